//! git-annex external special remote protocol
//!
//! Implements the dispatcher side of the external special remote protocol,
//! including the INFO and ASYNC protocol extensions. Define a type
//! implementing [`SpecialRemote`] and hand it to [`run`]; optional protocol
//! messages are supported by also implementing the matching `Has*`
//! capability trait and overriding the corresponding `as_*` probe.
//!
//! See <https://git-annex.branchable.com/design/external_special_remote_protocol/>
//! for the underlying protocol and the semantics of its operations.
//!
//! # Example
//!
//! ```rust,ignore
//! use annex_external::remote::{self, Annex, RemoteResult, SpecialRemote};
//!
//! struct MyRemote;
//!
//! #[async_trait::async_trait]
//! impl SpecialRemote for MyRemote {
//! 	async fn init(&self, annex: &mut Annex<'_>) -> RemoteResult<()> {
//! 		let root = annex.get_config("root").await?;
//! 		// one-time setup ...
//! 		Ok(())
//! 	}
//! 	// prepare, store, retrieve, present, remove ...
//! }
//!
//! #[tokio::main]
//! async fn main() {
//! 	remote::run(MyRemote).await.ok();
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec;
use crate::error::{panic_message, EngineError};
use crate::logging::*;
use crate::mux::{self, JobLines};

mod optional;

pub use optional::{
	Availability, ConfigSetting, HasCheckUrl, HasClaimUrl, HasExport, HasExtensions,
	HasGetAvailability, HasGetCost, HasGetInfo, HasListConfigs, HasRemoveExportDirectory,
	HasRenameExport, HasWhereis, InfoField, UrlInfo,
};

/// Keyword of the protocol extension for info messages.
pub const EXT_INFO: &str = "INFO";
/// Keyword of the protocol extension for asynchronous jobs.
pub const EXT_ASYNC: &str = "ASYNC";

// Required git-annex-initiated messages.
const CMD_INITREMOTE: &str = "INITREMOTE";
const CMD_PREPARE: &str = "PREPARE";
const CMD_TRANSFER: &str = "TRANSFER";
const CMD_CHECKPRESENT: &str = "CHECKPRESENT";
const CMD_REMOVE: &str = "REMOVE";

// Optional git-annex-initiated messages.
const CMD_EXTENSIONS: &str = "EXTENSIONS";
const CMD_LISTCONFIGS: &str = "LISTCONFIGS";
const CMD_GETCOST: &str = "GETCOST";
const CMD_GETAVAILABILITY: &str = "GETAVAILABILITY";
const CMD_CLAIMURL: &str = "CLAIMURL";
const CMD_CHECKURL: &str = "CHECKURL";
const CMD_WHEREIS: &str = "WHEREIS";
const CMD_GETINFO: &str = "GETINFO";

// Export interface messages.
const CMD_EXPORTSUPPORTED: &str = "EXPORTSUPPORTED";
const CMD_EXPORT: &str = "EXPORT";
const CMD_CHECKPRESENTEXPORT: &str = "CHECKPRESENTEXPORT";
const CMD_TRANSFEREXPORT: &str = "TRANSFEREXPORT";
const CMD_REMOVEEXPORT: &str = "REMOVEEXPORT";
const CMD_REMOVEEXPORTDIRECTORY: &str = "REMOVEEXPORTDIRECTORY";
const CMD_RENAMEEXPORT: &str = "RENAMEEXPORT";

const DIR_STORE: &str = "STORE";
const DIR_RETRIEVE: &str = "RETRIEVE";

/// Error type returned by remote implementations.
///
/// Handler errors become `*-FAILURE` replies on the wire; their display
/// form is sent verbatim as the trailing argument. An [`EngineError`]
/// propagated through this type (for instance with `?` from an [`Annex`]
/// call) is recognized by the dispatcher and escalates to the fatal path
/// instead.
pub type RemoteError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Requests a remote implementation can make back to git-annex.
///
/// Handed to every handler. Query methods issue a request line and consume
/// the reply from the same conversation; this is safe because the
/// dispatcher never reads its next command while a handler is running.
pub struct Annex<'a> {
	lines: &'a mut JobLines,
}

impl<'a> Annex<'a> {
	pub(crate) fn new(lines: &'a mut JobLines) -> Self {
		Self { lines }
	}

	async fn expect_reply(&mut self) -> Result<String, EngineError> {
		self.lines
			.recv()
			.await?
			.ok_or_else(|| EngineError::Protocol("input closed while awaiting a reply".to_string()))
	}

	/// One `VALUE <s>`-replied round trip.
	async fn ask(&mut self, cmd: &str, args: &[&str]) -> Result<String, EngineError> {
		self.lines.send(cmd, args).await?;
		let reply = self.expect_reply().await?;
		let (token, values) = codec::decode(&reply, 1);
		if token != "VALUE" {
			return Err(EngineError::Protocol(format!(
				"got {} rather than VALUE in response",
				token
			)));
		}
		Ok(values[0].to_string())
	}

	/// Reports progress of an ongoing transfer; `bytes` is the total
	/// processed so far.
	pub async fn progress(&self, bytes: u64) -> Result<(), EngineError> {
		self.lines.send("PROGRESS", &[&bytes.to_string()]).await
	}

	/// Two-level hash directory for the key, with mixed-case components.
	pub async fn dirhash(&mut self, key: &str) -> Result<String, EngineError> {
		self.ask("DIRHASH", &[key]).await
	}

	/// Two-level hash directory for the key, all lowercase.
	pub async fn dirhash_lower(&mut self, key: &str) -> Result<String, EngineError> {
		self.ask("DIRHASH-LOWER", &[key]).await
	}

	pub async fn set_config(&self, setting: &str, value: &str) -> Result<(), EngineError> {
		self.lines.send("SETCONFIG", &[setting, value]).await
	}

	pub async fn get_config(&mut self, setting: &str) -> Result<String, EngineError> {
		self.ask("GETCONFIG", &[setting]).await
	}

	pub async fn set_creds(
		&self,
		setting: &str,
		user: &str,
		password: &str,
	) -> Result<(), EngineError> {
		self.lines.send("SETCREDS", &[setting, user, password]).await
	}

	/// Retrieve previously stored credentials as `(user, password)`.
	pub async fn get_creds(&mut self, setting: &str) -> Result<(String, String), EngineError> {
		self.lines.send("GETCREDS", &[setting]).await?;
		let reply = self.expect_reply().await?;
		let (token, values) = codec::decode(&reply, 2);
		if token != "CREDS" {
			return Err(EngineError::Protocol(format!(
				"got {} rather than CREDS in response",
				token
			)));
		}
		Ok((values[0].to_string(), values[1].to_string()))
	}

	pub async fn get_uuid(&mut self) -> Result<String, EngineError> {
		self.ask("GETUUID", &[]).await
	}

	pub async fn get_gitdir(&mut self) -> Result<String, EngineError> {
		self.ask("GETGITDIR", &[]).await
	}

	pub async fn set_wanted(&self, expression: &str) -> Result<(), EngineError> {
		self.lines.send("SETWANTED", &[expression]).await
	}

	pub async fn get_wanted(&mut self) -> Result<String, EngineError> {
		self.ask("GETWANTED", &[]).await
	}

	pub async fn set_state(&self, setting: &str, value: &str) -> Result<(), EngineError> {
		self.lines.send("SETSTATE", &[setting, value]).await
	}

	pub async fn get_state(&mut self, setting: &str) -> Result<String, EngineError> {
		self.ask("GETSTATE", &[setting]).await
	}

	pub async fn set_url_present(&self, key: &str, url: &str) -> Result<(), EngineError> {
		self.lines.send("SETURLPRESENT", &[key, url]).await
	}

	pub async fn set_url_missing(&self, key: &str, url: &str) -> Result<(), EngineError> {
		self.lines.send("SETURLMISSING", &[key, url]).await
	}

	pub async fn set_uri_present(&self, key: &str, uri: &str) -> Result<(), EngineError> {
		self.lines.send("SETURIPRESENT", &[key, uri]).await
	}

	pub async fn set_uri_missing(&self, key: &str, uri: &str) -> Result<(), EngineError> {
		self.lines.send("SETURIMISSING", &[key, uri]).await
	}

	/// All urls recorded for the key that start with the given prefix.
	///
	/// git-annex streams one `VALUE <url>` per url and terminates the list
	/// with a `VALUE` carrying an empty payload.
	pub async fn get_urls(&mut self, key: &str, prefix: &str) -> Result<Vec<String>, EngineError> {
		self.lines.send("GETURLS", &[key, prefix]).await?;
		let mut urls = Vec::new();
		loop {
			let reply = self.expect_reply().await?;
			let (token, values) = codec::decode(&reply, 1);
			if token != "VALUE" {
				return Err(EngineError::Protocol(format!(
					"got {} rather than VALUE in response",
					token
				)));
			}
			if values[0].is_empty() {
				return Ok(urls);
			}
			urls.push(values[0].to_string());
		}
	}

	pub async fn debug(&self, message: &str) -> Result<(), EngineError> {
		self.lines.send("DEBUG", &[message]).await
	}

	pub async fn info(&self, message: &str) -> Result<(), EngineError> {
		self.lines.send("INFO", &[message]).await
	}

	pub async fn error(&self, message: &str) -> Result<(), EngineError> {
		self.lines.send("ERROR", &[message]).await
	}
}

/// Core contract that external special remote implementations must satisfy.
///
/// The `as_*` methods are capability probes for the optional parts of the
/// protocol; each defaults to `None`, which makes the dispatcher answer
/// the matching command with `UNSUPPORTED-REQUEST`. Implementations
/// supporting a capability implement its trait and override the probe to
/// return `Some(self)`.
#[async_trait]
pub trait SpecialRemote: Send + Sync {
	/// Performs one-time setup tasks required to use the remote. It is not
	/// called every time git-annex interacts with the remote, but it may be
	/// called multiple times when the remote is enabled in different
	/// repositories or when a configuration value is changed.
	async fn init(&self, annex: &mut Annex<'_>) -> RemoteResult<()>;

	/// Prepares the remote to be used. Called once each time the remote is
	/// run, before any other methods that involve manipulating data.
	async fn prepare(&self, annex: &mut Annex<'_>) -> RemoteResult<()>;

	/// Associates the content of the given file with the given key.
	async fn store(&self, annex: &mut Annex<'_>, key: &str, file: &str) -> RemoteResult<()>;

	/// Places the content of the given key into the given file.
	async fn retrieve(&self, annex: &mut Annex<'_>, key: &str, file: &str) -> RemoteResult<()>;

	/// Checks whether the remote contains the data for the given key.
	async fn present(&self, annex: &mut Annex<'_>, key: &str) -> RemoteResult<bool>;

	/// Removes the content of the given key from the remote.
	async fn remove(&self, annex: &mut Annex<'_>, key: &str) -> RemoteResult<()>;

	fn as_extensions(&self) -> Option<&dyn HasExtensions> {
		None
	}
	fn as_list_configs(&self) -> Option<&dyn HasListConfigs> {
		None
	}
	fn as_get_cost(&self) -> Option<&dyn HasGetCost> {
		None
	}
	fn as_get_availability(&self) -> Option<&dyn HasGetAvailability> {
		None
	}
	fn as_claim_url(&self) -> Option<&dyn HasClaimUrl> {
		None
	}
	fn as_check_url(&self) -> Option<&dyn HasCheckUrl> {
		None
	}
	fn as_whereis(&self) -> Option<&dyn HasWhereis> {
		None
	}
	fn as_get_info(&self) -> Option<&dyn HasGetInfo> {
		None
	}
	fn as_export(&self) -> Option<&dyn HasExport> {
		None
	}
	fn as_remove_export_directory(&self) -> Option<&dyn HasRemoveExportDirectory> {
		None
	}
	fn as_rename_export(&self) -> Option<&dyn HasRenameExport> {
		None
	}
}

/// Per-conversation dispatcher: receives commands, routes them to the
/// remote implementation, and emits exactly one terminal reply per command
/// (or the documented multi-line block, or none for `EXPORT`).
pub(crate) struct RemoteDispatcher {
	lines: JobLines,
	remote: Arc<dyn SpecialRemote>,
	export_name: String,
}

impl RemoteDispatcher {
	fn new(lines: JobLines, remote: Arc<dyn SpecialRemote>) -> Self {
		Self { lines, remote, export_name: String::new() }
	}

	/// Conversation loop: one command at a time until EOF or a fatal error.
	///
	/// A panic escaping a handler corrupts only this conversation; it is
	/// caught here and reported like any other fatal error, leaving
	/// sibling jobs running.
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
			CMD_INITREMOTE => self.initremote().await,
			CMD_PREPARE => self.prepare().await,
			CMD_TRANSFER => {
				let args = codec::split_args(rest, 3);
				self.transfer(args[0], args[1], args[2]).await
			}
			CMD_CHECKPRESENT => {
				let args = codec::split_args(rest, 1);
				self.checkpresent(args[0]).await
			}
			CMD_REMOVE => {
				let args = codec::split_args(rest, 1);
				self.remove(args[0]).await
			}
			CMD_EXTENSIONS => self.extensions(rest).await,
			CMD_LISTCONFIGS => self.listconfigs().await,
			CMD_GETCOST => self.getcost().await,
			CMD_GETAVAILABILITY => self.getavailability().await,
			CMD_CLAIMURL => {
				let args = codec::split_args(rest, 1);
				self.claimurl(args[0]).await
			}
			CMD_CHECKURL => {
				let args = codec::split_args(rest, 1);
				self.checkurl(args[0]).await
			}
			CMD_WHEREIS => {
				let args = codec::split_args(rest, 1);
				self.whereis(args[0]).await
			}
			CMD_GETINFO => self.getinfo().await,
			CMD_EXPORTSUPPORTED => self.exportsupported().await,
			CMD_EXPORT => {
				let args = codec::split_args(rest, 1);
				self.export(args[0]).await
			}
			CMD_CHECKPRESENTEXPORT => {
				let args = codec::split_args(rest, 1);
				self.checkpresentexport(args[0]).await
			}
			CMD_TRANSFEREXPORT => {
				let args = codec::split_args(rest, 3);
				self.transferexport(args[0], args[1], args[2]).await
			}
			CMD_REMOVEEXPORT => {
				let args = codec::split_args(rest, 1);
				self.removeexport(args[0]).await
			}
			CMD_REMOVEEXPORTDIRECTORY => {
				let args = codec::split_args(rest, 1);
				self.removeexportdirectory(args[0]).await
			}
			CMD_RENAMEEXPORT => {
				let args = codec::split_args(rest, 2);
				self.renameexport(args[0], args[1]).await
			}
			_ => self.unsupported().await,
		}
	}

	pub(crate) async fn unsupported(&self) -> Result<(), EngineError> {
		self.lines.send("UNSUPPORTED-REQUEST", &[]).await
	}

	/// Turn a handler error into its wire message, or escalate it when it
	/// is really an engine error smuggled through the handler's `?`.
	fn user_message(err: RemoteError) -> Result<String, EngineError> {
		match err.downcast::<EngineError>() {
			Ok(engine) => Err(*engine),
			Err(err) => Ok(err.to_string()),
		}
	}

	async fn initremote(&mut self) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			self.remote.init(&mut annex).await
		};
		match result {
			Ok(()) => self.lines.send("INITREMOTE-SUCCESS", &[]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("INITREMOTE-FAILURE", &[&msg]).await
			}
		}
	}

	async fn prepare(&mut self) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			self.remote.prepare(&mut annex).await
		};
		match result {
			Ok(()) => self.lines.send("PREPARE-SUCCESS", &[]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("PREPARE-FAILURE", &[&msg]).await
			}
		}
	}

	async fn transfer(&mut self, dir: &str, key: &str, file: &str) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			match dir {
				DIR_STORE => self.remote.store(&mut annex, key, file).await,
				DIR_RETRIEVE => self.remote.retrieve(&mut annex, key, file).await,
				_ => {
					return Err(EngineError::Protocol(format!(
						"unknown transfer direction {}",
						dir
					)))
				}
			}
		};
		match result {
			Ok(()) => self.lines.send("TRANSFER-SUCCESS", &[dir, key]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("TRANSFER-FAILURE", &[dir, key, &msg]).await
			}
		}
	}

	async fn checkpresent(&mut self, key: &str) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			self.remote.present(&mut annex, key).await
		};
		match result {
			Ok(true) => self.lines.send("CHECKPRESENT-SUCCESS", &[key]).await,
			Ok(false) => self.lines.send("CHECKPRESENT-FAILURE", &[key]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("CHECKPRESENT-UNKNOWN", &[key, &msg]).await
			}
		}
	}

	async fn remove(&mut self, key: &str) -> Result<(), EngineError> {
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			self.remote.remove(&mut annex, key).await
		};
		match result {
			Ok(()) => self.lines.send("REMOVE-SUCCESS", &[key]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("REMOVE-FAILURE", &[key, &msg]).await
			}
		}
	}
}

/// Executes an external special remote with the provided input and output
/// streams. Intended for tests; production remotes use [`run`].
pub async fn run_with_streams<R, W>(
	input: R,
	output: W,
	remote: impl SpecialRemote + 'static,
) -> Result<(), EngineError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let remote: Arc<dyn SpecialRemote> = Arc::new(remote);
	mux::run_session(input, output, Some("VERSION 1"), move |lines| {
		let remote = remote.clone();
		tokio::spawn(RemoteDispatcher::new(lines, remote).run())
	})
	.await
}

/// Executes an external special remote as git-annex expects, reading from
/// stdin and writing to stdout. Returns on clean EOF.
pub async fn run(remote: impl SpecialRemote + 'static) -> Result<(), EngineError> {
	run_with_streams(tokio::io::stdin(), tokio::io::stdout(), remote).await
}

// vim: ts=4
