//! git-annex external backend protocol
//!
//! Implements the dispatcher side of the external backend protocol, which
//! delegates key computation for annexed files to an external program.
//! Define a type implementing [`Backend`] and hand it to [`run`]; key
//! verification support is added by also implementing
//! [`HasVerifyKeyContent`] and overriding the probe.
//!
//! The backend's name is taken from the executable: a program installed as
//! `git-annex-backend-XFOO` is backend `FOO`, and the keys it generates
//! read `XFOO-s<bytes>--<hash>` or `XFOO--<hash>`. The engine builds that
//! envelope; implementations supply only the content-hash portion and a
//! flag requesting the size field.
//!
//! See <https://git-annex.branchable.com/design/external_backend_protocol/>
//! for the underlying protocol and the semantics of its operations.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::fs as afs;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec;
use crate::error::{panic_message, EngineError};
use crate::logging::*;
use crate::mux::{self, JobLines};

const CMD_GETVERSION: &str = "GETVERSION";
const CMD_CANVERIFY: &str = "CANVERIFY";
const CMD_ISSTABLE: &str = "ISSTABLE";
const CMD_ISCRYPTOGRAPHICALLYSECURE: &str = "ISCRYPTOGRAPHICALLYSECURE";
const CMD_GENKEY: &str = "GENKEY";
const CMD_VERIFYKEYCONTENT: &str = "VERIFYKEYCONTENT";

/// The executable prefix that carries the backend name.
const NAME_PREFIX: &str = "git-annex-backend-X";

/// Error type returned by backend implementations.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Requests a backend implementation can make back to git-annex.
///
/// A strict subset of the special remote façade: progress reporting and
/// diagnostics only.
pub struct Annex<'a> {
	lines: &'a mut JobLines,
}

impl<'a> Annex<'a> {
	pub(crate) fn new(lines: &'a mut JobLines) -> Self {
		Self { lines }
	}

	/// Reports progress of an ongoing key generation or verification;
	/// `bytes` is the total processed so far.
	pub async fn progress(&self, bytes: u64) -> Result<(), EngineError> {
		self.lines.send("PROGRESS", &[&bytes.to_string()]).await
	}

	pub async fn debug(&self, message: &str) -> Result<(), EngineError> {
		self.lines.send("DEBUG", &[message]).await
	}

	pub async fn error(&self, message: &str) -> Result<(), EngineError> {
		self.lines.send("ERROR", &[message]).await
	}
}

/// Core contract that external backend implementations must satisfy.
#[async_trait]
pub trait Backend: Send + Sync {
	/// Whether this backend will always generate the same key for a given
	/// file.
	async fn is_stable(&self, annex: &mut Annex<'_>) -> bool;

	/// Computes the key name for the content of the given file: just the
	/// content hash, not the full key envelope. The second element of the
	/// pair requests inclusion of the file's size in the full key.
	async fn gen_key(&self, annex: &mut Annex<'_>, file: &str) -> BackendResult<(String, bool)>;

	fn as_verify_key_content(&self) -> Option<&dyn HasVerifyKeyContent> {
		None
	}
}

/// Support for verifying keys against file content.
#[async_trait]
pub trait HasVerifyKeyContent: Send + Sync {
	/// Checks whether the given key name (the content-hash portion) is
	/// valid for the content of the given file.
	async fn verify_key_content(&self, annex: &mut Annex<'_>, key: &str, file: &str) -> bool;

	/// Whether the verification done by this backend is cryptographically
	/// secure.
	async fn is_cryptographically_secure(&self, annex: &mut Annex<'_>) -> bool;
}

struct BackendDispatcher {
	lines: JobLines,
	backend: Arc<dyn Backend>,
	name: String,
}

impl BackendDispatcher {
	fn new(lines: JobLines, backend: Arc<dyn Backend>, name: String) -> Self {
		Self { lines, backend, name }
	}

	async fn run(mut self) {
		loop {
			let line = match self.lines.recv().await {
				Ok(Some(line)) => line,
				Ok(None) => return,
				Err(err) => return self.fail(err).await,
			};
			match AssertUnwindSafe(self.handle(&line)).catch_unwind().await {
				Ok(Ok(())) => {}
				Ok(Err(err)) => return self.fail(err).await,
				Err(payload) => {
					return self.fail(EngineError::Protocol(panic_message(payload))).await
				}
			}
		}
	}

	async fn fail(&self, err: EngineError) {
		error!("job {} conversation failed: {}", self.lines.num(), err);
		let _ = self.lines.send("ERROR", &[&format!("failed: {}", err)]).await;
	}

	async fn handle(&mut self, line: &str) -> Result<(), EngineError> {
		let mut split = line.splitn(2, ' ');
		let cmd = split.next().unwrap_or("");
		let rest = split.next().unwrap_or("");

		match cmd {
			CMD_GETVERSION => self.lines.send("VERSION", &["1"]).await,
			CMD_CANVERIFY => self.canverify().await,
			CMD_ISSTABLE => self.isstable().await,
			CMD_ISCRYPTOGRAPHICALLYSECURE => self.iscryptographicallysecure().await,
			CMD_GENKEY => {
				let args = codec::split_args(rest, 1);
				self.genkey(args[0]).await
			}
			CMD_VERIFYKEYCONTENT => {
				let args = codec::split_args(rest, 2);
				self.verifykeycontent(args[0], args[1]).await
			}
			_ => self.lines.send("UNSUPPORTED-REQUEST", &[]).await,
		}
	}

	fn user_message(err: BackendError) -> Result<String, EngineError> {
		match err.downcast::<EngineError>() {
			Ok(engine) => Err(*engine),
			Err(err) => Ok(err.to_string()),
		}
	}

	async fn canverify(&mut self) -> Result<(), EngineError> {
		if self.backend.as_verify_key_content().is_some() {
			self.lines.send("CANVERIFY-YES", &[]).await
		} else {
			self.lines.send("CANVERIFY-NO", &[]).await
		}
	}

	async fn isstable(&mut self) -> Result<(), EngineError> {
		let stable = {
			let mut annex = Annex::new(&mut self.lines);
			self.backend.is_stable(&mut annex).await
		};
		if stable {
			self.lines.send("ISSTABLE-YES", &[]).await
		} else {
			self.lines.send("ISSTABLE-NO", &[]).await
		}
	}

	async fn iscryptographicallysecure(&mut self) -> Result<(), EngineError> {
		let Some(h) = self.backend.as_verify_key_content() else {
			return self.lines.send("ISCRYPTOGRAPHICALLYSECURE-NO", &[]).await;
		};
		let secure = {
			let mut annex = Annex::new(&mut self.lines);
			h.is_cryptographically_secure(&mut annex).await
		};
		if secure {
			self.lines.send("ISCRYPTOGRAPHICALLYSECURE-YES", &[]).await
		} else {
			self.lines.send("ISCRYPTOGRAPHICALLYSECURE-NO", &[]).await
		}
	}

	async fn genkey(&mut self, file: &str) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			self.backend.gen_key(&mut annex, file).await
		};
		let (name, include_size) = match result {
			Ok(generated) => generated,
			Err(err) => {
				let msg = Self::user_message(err)?;
				return self.lines.send("GENKEY-FAILURE", &[&msg]).await;
			}
		};
		let key = if include_size {
			let meta = match afs::metadata(file).await {
				Ok(meta) => meta,
				Err(err) => {
					return self.lines.send("GENKEY-FAILURE", &[&err.to_string()]).await;
				}
			};
			format!("X{}-s{}--{}", self.name, meta.len(), name)
		} else {
			format!("X{}--{}", self.name, name)
		};
		self.lines.send("GENKEY-SUCCESS", &[&key]).await
	}

	async fn verifykeycontent(&mut self, key: &str, file: &str) -> Result<(), EngineError> {
		let Some(h) = self.backend.as_verify_key_content() else {
			return self.lines.send("UNSUPPORTED-REQUEST", &[]).await;
		};
		// The content hash is everything after the first "--" of the key
		// envelope.
		let Some((_, name)) = key.split_once("--") else {
			return Err(EngineError::Protocol(format!(
				"key {:?} has no content hash separator",
				key
			)));
		};
		let valid = {
			let mut annex = Annex::new(&mut self.lines);
			h.verify_key_content(&mut annex, name, file).await
		};
		if valid {
			self.lines.send("VERIFYKEYCONTENT-SUCCESS", &[]).await
		} else {
			self.lines.send("VERIFYKEYCONTENT-FAILURE", &[]).await
		}
	}
}

/// The backend name for this process: the executable basename with the
/// `git-annex-backend-X` prefix removed, or empty when the prefix is
/// absent.
fn backend_name() -> String {
	let program = std::env::args().next().unwrap_or_default();
	let base = Path::new(&program).file_name().and_then(|name| name.to_str()).unwrap_or("");
	base.strip_prefix(NAME_PREFIX).unwrap_or("").to_string()
}

/// Executes an external backend with the provided input and output streams
/// and an explicit backend name (already stripped of the
/// `git-annex-backend-X` prefix). Intended for tests; production backends
/// use [`run`].
pub async fn run_with_streams<R, W>(
	input: R,
	output: W,
	name: &str,
	backend: impl Backend + 'static,
) -> Result<(), EngineError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let backend: Arc<dyn Backend> = Arc::new(backend);
	let name = name.to_string();
	mux::run_session(input, output, None, move |lines| {
		let backend = backend.clone();
		let name = name.clone();
		tokio::spawn(BackendDispatcher::new(lines, backend, name).run())
	})
	.await
}

/// Executes an external backend as git-annex expects, reading from stdin
/// and writing to stdout. Returns on clean EOF.
pub async fn run(backend: impl Backend + 'static) -> Result<(), EngineError> {
	run_with_streams(tokio::io::stdin(), tokio::io::stdout(), &backend_name(), backend).await
}


// vim: ts=4
