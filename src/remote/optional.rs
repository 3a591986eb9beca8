//! Optional special remote capabilities
//!
//! Each optional protocol command maps to one small trait. The dispatcher
//! probes for the trait through the `as_*` accessors on
//! [`SpecialRemote`](super::SpecialRemote) before invoking anything, and
//! answers `UNSUPPORTED-REQUEST` when the probe comes back empty. Probes
//! are pure queries with no side effects.

use std::fmt;

use async_trait::async_trait;

use super::{Annex, RemoteDispatcher, RemoteResult, DIR_RETRIEVE, DIR_STORE};
use crate::error::EngineError;

/// One configuration setting that can be set for a remote, for the
/// `LISTCONFIGS` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSetting {
	pub name: String,
	pub description: String,
}

/// Information about one url, for the `CHECKURL` command. A negative size
/// means the size is unknown and is transmitted as the literal `UNKNOWN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlInfo {
	pub url: String,
	pub size: i64,
	pub filename: String,
}

/// One field to include in the output of `git annex info`, for the
/// `GETINFO` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoField {
	pub name: String,
	pub value: String,
}

/// Where a remote's content can be reached from, for `GETAVAILABILITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
	Globally,
	Locally,
}

impl fmt::Display for Availability {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Availability::Globally => write!(f, "GLOBALLY"),
			Availability::Locally => write!(f, "LOCALLY"),
		}
	}
}

/// Support for the `EXTENSIONS` handshake. Receives the extensions
/// git-annex offers and returns those the remote wants enabled (see
/// [`EXT_INFO`](super::EXT_INFO) and [`EXT_ASYNC`](super::EXT_ASYNC)).
#[async_trait]
pub trait HasExtensions: Send + Sync {
	async fn extensions(&self, annex: &mut Annex<'_>, extensions: &[String]) -> Vec<String>;
}

/// Support for the `LISTCONFIGS` command.
#[async_trait]
pub trait HasListConfigs: Send + Sync {
	async fn list_configs(&self, annex: &mut Annex<'_>) -> Vec<ConfigSetting>;
}

/// Support for the `GETCOST` command.
#[async_trait]
pub trait HasGetCost: Send + Sync {
	async fn get_cost(&self, annex: &mut Annex<'_>) -> u32;
}

/// Support for the `GETAVAILABILITY` command.
#[async_trait]
pub trait HasGetAvailability: Send + Sync {
	async fn get_availability(&self, annex: &mut Annex<'_>) -> Availability;
}

/// Support for the `CLAIMURL` command: whether this remote wants to claim
/// responsibility for the url.
#[async_trait]
pub trait HasClaimUrl: Send + Sync {
	async fn claim_url(&self, annex: &mut Annex<'_>, url: &str) -> bool;
}

/// Support for the `CHECKURL` command.
///
/// Returning a single [`UrlInfo`] with an empty `url` field translates
/// into a `CHECKURL-CONTENTS` reply; anything else becomes
/// `CHECKURL-MULTI`.
#[async_trait]
pub trait HasCheckUrl: Send + Sync {
	async fn check_url(&self, annex: &mut Annex<'_>, url: &str) -> RemoteResult<Vec<UrlInfo>>;
}

/// Support for the `WHEREIS` command: a human-readable description of
/// where the key's content is kept. Returning an empty string reports
/// failure.
#[async_trait]
pub trait HasWhereis: Send + Sync {
	async fn whereis(&self, annex: &mut Annex<'_>, key: &str) -> String;
}

/// Support for the `GETINFO` command.
#[async_trait]
pub trait HasGetInfo: Send + Sync {
	async fn get_info(&self, annex: &mut Annex<'_>) -> Vec<InfoField>;
}

/// Support for the export interface. `name` is the user-visible export
/// location most recently announced by an `EXPORT` message on this
/// conversation.
#[async_trait]
pub trait HasExport: Send + Sync {
	/// Associates the content of the given file with the given key at the
	/// exported name.
	async fn store_export(
		&self,
		annex: &mut Annex<'_>,
		name: &str,
		key: &str,
		file: &str,
	) -> RemoteResult<()>;

	/// Places the content of the given key, stored at the exported name,
	/// into the given file.
	async fn retrieve_export(
		&self,
		annex: &mut Annex<'_>,
		name: &str,
		key: &str,
		file: &str,
	) -> RemoteResult<()>;

	/// Checks whether the remote contains the key's data at the exported
	/// name.
	async fn present_export(
		&self,
		annex: &mut Annex<'_>,
		name: &str,
		key: &str,
	) -> RemoteResult<bool>;

	/// Removes the key's content at the exported name.
	async fn remove_export(
		&self,
		annex: &mut Annex<'_>,
		name: &str,
		key: &str,
	) -> RemoteResult<()>;
}

/// Support for the `REMOVEEXPORTDIRECTORY` command.
#[async_trait]
pub trait HasRemoveExportDirectory: Send + Sync {
	async fn remove_export_directory(
		&self,
		annex: &mut Annex<'_>,
		directory: &str,
	) -> RemoteResult<()>;
}

/// Support for the `RENAMEEXPORT` command.
#[async_trait]
pub trait HasRenameExport: Send + Sync {
	async fn rename_export(
		&self,
		annex: &mut Annex<'_>,
		name: &str,
		key: &str,
		new_name: &str,
	) -> RemoteResult<()>;
}

fn size_token(size: i64) -> String {
	if size < 0 {
		"UNKNOWN".to_string()
	} else {
		size.to_string()
	}
}

impl RemoteDispatcher {
	pub(super) async fn extensions(&mut self, rest: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_extensions() else {
			return self.unsupported().await;
		};
		let offered: Vec<String> =
			rest.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
		let wanted = {
			let mut annex = Annex::new(&mut self.lines);
			h.extensions(&mut annex, &offered).await
		};
		self.lines.send("EXTENSIONS", &[&wanted.join(" ")]).await
	}

	pub(super) async fn listconfigs(&mut self) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_list_configs() else {
			return self.unsupported().await;
		};
		let configs = {
			let mut annex = Annex::new(&mut self.lines);
			h.list_configs(&mut annex).await
		};
		for config in &configs {
			self.lines.send("CONFIG", &[&config.name, &config.description]).await?;
		}
		self.lines.send("CONFIGEND", &[]).await
	}

	pub(super) async fn getcost(&mut self) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_get_cost() else {
			return self.unsupported().await;
		};
		let cost = {
			let mut annex = Annex::new(&mut self.lines);
			h.get_cost(&mut annex).await
		};
		self.lines.send("COST", &[&cost.to_string()]).await
	}

	pub(super) async fn getavailability(&mut self) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_get_availability() else {
			return self.unsupported().await;
		};
		let availability = {
			let mut annex = Annex::new(&mut self.lines);
			h.get_availability(&mut annex).await
		};
		self.lines.send("AVAILABILITY", &[&availability.to_string()]).await
	}

	pub(super) async fn claimurl(&mut self, url: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_claim_url() else {
			return self.unsupported().await;
		};
		let claimed = {
			let mut annex = Annex::new(&mut self.lines);
			h.claim_url(&mut annex, url).await
		};
		if claimed {
			self.lines.send("CLAIMURL-SUCCESS", &[]).await
		} else {
			self.lines.send("CLAIMURL-FAILURE", &[]).await
		}
	}

	pub(super) async fn checkurl(&mut self, url: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_check_url() else {
			return self.unsupported().await;
		};
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			h.check_url(&mut annex, url).await
		};
		let urls = match result {
			Ok(urls) => urls,
			Err(err) => {
				let msg = Self::user_message(err)?;
				return self.lines.send("CHECKURL-FAILURE", &[&msg]).await;
			}
		};

		// Urls and filenames travel as single space-separated fields, so
		// an embedded space or newline would desynchronize the reply.
		for info in &urls {
			if info.url.contains(' ') || info.url.contains('\n') {
				return self
					.lines
					.send(
						"CHECKURL-FAILURE",
						&["remote implementation returned a URL containing a space"],
					)
					.await;
			}
			if info.filename.contains(' ') || info.filename.contains('\n') {
				return self
					.lines
					.send(
						"CHECKURL-FAILURE",
						&["remote implementation returned a filename containing a space"],
					)
					.await;
			}
		}

		if urls.len() == 1 && urls[0].url.is_empty() {
			let size = size_token(urls[0].size);
			return self.lines.send("CHECKURL-CONTENTS", &[&size, &urls[0].filename]).await;
		}

		let mut args: Vec<String> = Vec::with_capacity(urls.len() * 3);
		for info in &urls {
			args.push(info.url.clone());
			args.push(size_token(info.size));
			args.push(info.filename.clone());
		}
		let refs: Vec<&str> = args.iter().map(String::as_str).collect();
		self.lines.send("CHECKURL-MULTI", &refs).await
	}

	pub(super) async fn whereis(&mut self, key: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_whereis() else {
			return self.unsupported().await;
		};
		let location = {
			let mut annex = Annex::new(&mut self.lines);
			h.whereis(&mut annex, key).await
		};
		if location.is_empty() {
			self.lines.send("WHEREIS-FAILURE", &[]).await
		} else {
			self.lines.send("WHEREIS-SUCCESS", &[&location]).await
		}
	}

	pub(super) async fn getinfo(&mut self) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_get_info() else {
			return self.unsupported().await;
		};
		let fields = {
			let mut annex = Annex::new(&mut self.lines);
			h.get_info(&mut annex).await
		};
		for field in &fields {
			self.lines.send("INFOFIELD", &[&field.name]).await?;
			self.lines.send("INFOVALUE", &[&field.value]).await?;
		}
		self.lines.send("INFOEND", &[]).await
	}

	pub(super) async fn exportsupported(&mut self) -> Result<(), EngineError> {
		if self.remote.as_export().is_some() {
			self.lines.send("EXPORTSUPPORTED-SUCCESS", &[]).await
		} else {
			self.lines.send("EXPORTSUPPORTED-FAILURE", &[]).await
		}
	}

	/// `EXPORT <name>` has no reply; the name sticks to this conversation
	/// and is consumed by the subsequent export operations.
	pub(super) async fn export(&mut self, name: &str) -> Result<(), EngineError> {
		if self.remote.as_export().is_none() {
			return self.unsupported().await;
		}
		self.export_name = name.to_string();
		Ok(())
	}

	pub(super) async fn checkpresentexport(&mut self, key: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_export() else {
			return self.unsupported().await;
		};
		let name = self.export_name.clone();
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			h.present_export(&mut annex, &name, key).await
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

	pub(super) async fn transferexport(
		&mut self,
		dir: &str,
		key: &str,
		file: &str,
	) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_export() else {
			return self.unsupported().await;
		};
		let name = self.export_name.clone();
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			match dir {
				DIR_STORE => h.store_export(&mut annex, &name, key, file).await,
				DIR_RETRIEVE => h.retrieve_export(&mut annex, &name, key, file).await,
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

	pub(super) async fn removeexport(&mut self, key: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_export() else {
			return self.unsupported().await;
		};
		let name = self.export_name.clone();
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			h.remove_export(&mut annex, &name, key).await
		};
		match result {
			Ok(()) => self.lines.send("REMOVE-SUCCESS", &[key]).await,
			Err(err) => {
				let msg = Self::user_message(err)?;
				self.lines.send("REMOVE-FAILURE", &[key, &msg]).await
			}
		}
	}

	pub(super) async fn removeexportdirectory(&mut self, directory: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_remove_export_directory() else {
			return self.unsupported().await;
		};
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			h.remove_export_directory(&mut annex, directory).await
		};
		match result {
			Ok(()) => self.lines.send("REMOVEEXPORTDIRECTORY-SUCCESS", &[]).await,
			Err(err) => {
				Self::user_message(err)?;
				self.lines.send("REMOVEEXPORTDIRECTORY-FAILURE", &[]).await
			}
		}
	}

	pub(super) async fn renameexport(&mut self, key: &str, new_name: &str) -> Result<(), EngineError> {
		let Some(h) = self.remote.as_rename_export() else {
			return self.unsupported().await;
		};
		let name = self.export_name.clone();
		let result = {
			let mut annex = Annex::new(&mut self.lines);
			h.rename_export(&mut annex, &name, key, new_name).await
		};
		match result {
			Ok(()) => self.lines.send("RENAMEEXPORT-SUCCESS", &[key]).await,
			Err(err) => {
				Self::user_message(err)?;
				self.lines.send("RENAMEEXPORT-FAILURE", &[key]).await
			}
		}
	}
}

// vim: ts=4
