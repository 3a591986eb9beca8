//! Special remote protocol tests
//!
//! Drives full protocol conversations through `run_with_streams` over
//! in-memory streams and checks the exact wire output: handshake,
//! required commands, reply shapes for user failures, capability
//! detection, and fatal protocol errors.

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use annex_external::remote::{
	self, Annex, Availability, ConfigSetting, HasClaimUrl, HasExtensions, HasGetAvailability,
	HasGetCost, HasGetInfo, HasListConfigs, HasWhereis, InfoField, RemoteResult, SpecialRemote,
	EXT_ASYNC, EXT_INFO,
};

// ============================================================================
// Helpers
// ============================================================================

/// Run one conversation to EOF and capture everything the engine wrote.
async fn run_conversation(remote: impl SpecialRemote + 'static, input: &str) -> String {
	let (writer, mut reader) = tokio::io::duplex(1 << 20);
	remote::run_with_streams(input.as_bytes(), writer, remote)
		.await
		.expect("session should end cleanly");
	let mut output = String::new();
	reader.read_to_string(&mut output).await.unwrap();
	output
}

/// Minimal remote: every operation succeeds, nothing is ever present.
struct NullRemote;

#[async_trait]
impl SpecialRemote for NullRemote {
	async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Ok(())
	}
	async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Ok(())
	}
	async fn store(&self, _annex: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Ok(())
	}
	async fn retrieve(&self, _annex: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Ok(())
	}
	async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
		Ok(false)
	}
	async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
		Ok(())
	}
}

/// Remote whose handlers all fail with distinctive messages.
struct FailingRemote;

#[async_trait]
impl SpecialRemote for FailingRemote {
	async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Err("init failed badly".into())
	}
	async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Err("no remote configured".into())
	}
	async fn store(&self, _annex: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Err("disk full".into())
	}
	async fn retrieve(&self, _annex: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Err("content missing".into())
	}
	async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
		Err("cannot reach server".into())
	}
	async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
		Err("remove denied".into())
	}
}

// ============================================================================
// Handshake and required commands
// ============================================================================

#[tokio::test]
async fn test_version_handshake_precedes_everything() {
	let output = run_conversation(NullRemote, "").await;
	assert_eq!(output, "VERSION 1\n");
}

#[tokio::test]
async fn test_remote_happy_path() {
	let output =
		run_conversation(NullRemote, "INITREMOTE\nPREPARE\nCHECKPRESENT foo\nREMOVE foo\n").await;
	assert_eq!(
		output,
		"VERSION 1\n\
		 INITREMOTE-SUCCESS\n\
		 PREPARE-SUCCESS\n\
		 CHECKPRESENT-FAILURE foo\n\
		 REMOVE-SUCCESS foo\n"
	);
}

#[tokio::test]
async fn test_checkpresent_success_when_present() {
	struct PresentRemote;

	#[async_trait]
	impl SpecialRemote for PresentRemote {
		async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn store(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
			Ok(true)
		}
		async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
			Ok(())
		}
	}

	let output = run_conversation(PresentRemote, "CHECKPRESENT foo\n").await;
	assert_eq!(output, "VERSION 1\nCHECKPRESENT-SUCCESS foo\n");
}

#[tokio::test]
async fn test_transfer_store_and_retrieve() {
	let output =
		run_conversation(NullRemote, "TRANSFER STORE k1 /tmp/f\nTRANSFER RETRIEVE k1 /tmp/f\n")
			.await;
	assert_eq!(
		output,
		"VERSION 1\nTRANSFER-SUCCESS STORE k1\nTRANSFER-SUCCESS RETRIEVE k1\n"
	);
}

#[tokio::test]
async fn test_transfer_file_argument_may_contain_spaces() {
	struct FileCheckRemote;

	#[async_trait]
	impl SpecialRemote for FileCheckRemote {
		async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn store(&self, _a: &mut Annex<'_>, key: &str, file: &str) -> RemoteResult<()> {
			assert_eq!(key, "k1");
			assert_eq!(file, "/tmp/dir with spaces/f");
			Ok(())
		}
		async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
			Ok(false)
		}
		async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
			Ok(())
		}
	}

	let output =
		run_conversation(FileCheckRemote, "TRANSFER STORE k1 /tmp/dir with spaces/f\n").await;
	assert_eq!(output, "VERSION 1\nTRANSFER-SUCCESS STORE k1\n");
}

#[tokio::test]
async fn test_transfer_with_progress() {
	struct ProgressRemote;

	#[async_trait]
	impl SpecialRemote for ProgressRemote {
		async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn store(&self, annex: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			annex.progress(4096).await?;
			annex.progress(8192).await?;
			Ok(())
		}
		async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
			Ok(false)
		}
		async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
			Ok(())
		}
	}

	let output = run_conversation(ProgressRemote, "TRANSFER STORE k1 /tmp/f\n").await;
	assert_eq!(
		output,
		"VERSION 1\nPROGRESS 4096\nPROGRESS 8192\nTRANSFER-SUCCESS STORE k1\n"
	);
}

// ============================================================================
// User failure reply shapes
// ============================================================================

#[tokio::test]
async fn test_init_failure_carries_message() {
	let output = run_conversation(FailingRemote, "INITREMOTE\n").await;
	assert_eq!(output, "VERSION 1\nINITREMOTE-FAILURE init failed badly\n");
}

#[tokio::test]
async fn test_transfer_failure_keeps_direction_and_key() {
	let output = run_conversation(FailingRemote, "TRANSFER STORE k1 /tmp/f\n").await;
	assert_eq!(output, "VERSION 1\nTRANSFER-FAILURE STORE k1 disk full\n");
}

#[tokio::test]
async fn test_checkpresent_error_is_unknown() {
	let output = run_conversation(FailingRemote, "CHECKPRESENT foo\n").await;
	assert_eq!(output, "VERSION 1\nCHECKPRESENT-UNKNOWN foo cannot reach server\n");
}

#[tokio::test]
async fn test_remove_failure_carries_key_and_message() {
	let output = run_conversation(FailingRemote, "REMOVE foo\n").await;
	assert_eq!(output, "VERSION 1\nREMOVE-FAILURE foo remove denied\n");
}

#[tokio::test]
async fn test_error_message_newlines_are_escaped() {
	struct NewlineRemote;

	#[async_trait]
	impl SpecialRemote for NewlineRemote {
		async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Err("first line\nsecond line".into())
		}
		async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn store(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
			Ok(false)
		}
		async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
			Ok(())
		}
	}

	let output = run_conversation(NewlineRemote, "INITREMOTE\n").await;
	assert_eq!(output, "VERSION 1\nINITREMOTE-FAILURE first line\\nsecond line\n");
}

// ============================================================================
// Fatal protocol errors
// ============================================================================

#[tokio::test]
async fn test_unknown_transfer_direction_is_fatal() {
	let output = run_conversation(NullRemote, "TRANSFER SHRED k1 /tmp/f\n").await;
	assert_eq!(output, "VERSION 1\nERROR failed: unknown transfer direction SHRED\n");
}

#[tokio::test]
async fn test_handler_panic_is_caught_at_dispatcher_boundary() {
	struct PanickingRemote;

	#[async_trait]
	impl SpecialRemote for PanickingRemote {
		async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			panic!("init exploded");
		}
		async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
			Ok(())
		}
		async fn store(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
			Ok(())
		}
		async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
			Ok(false)
		}
		async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
			Ok(())
		}
	}

	let output = run_conversation(PanickingRemote, "INITREMOTE\n").await;
	assert_eq!(output, "VERSION 1\nERROR failed: init exploded\n");
}

#[tokio::test]
async fn test_conversation_ends_after_fatal_error() {
	// Commands after the fatal one are dropped, not answered.
	let output = run_conversation(NullRemote, "TRANSFER SHRED k1 /tmp/f\nPREPARE\n").await;
	assert_eq!(output, "VERSION 1\nERROR failed: unknown transfer direction SHRED\n");
}

// ============================================================================
// Capability detection
// ============================================================================

#[tokio::test]
async fn test_unknown_command_is_unsupported() {
	let output = run_conversation(NullRemote, "FROBNICATE now\n").await;
	assert_eq!(output, "VERSION 1\nUNSUPPORTED-REQUEST\n");
}

#[tokio::test]
async fn test_empty_command_is_unsupported() {
	let output = run_conversation(NullRemote, "\n").await;
	assert_eq!(output, "VERSION 1\nUNSUPPORTED-REQUEST\n");
}

#[tokio::test]
async fn test_optional_commands_without_capability_are_unsupported() {
	let input = "EXTENSIONS INFO ASYNC\nLISTCONFIGS\nGETCOST\nGETAVAILABILITY\n\
	             CLAIMURL http://x\nCHECKURL http://x\nWHEREIS k\nGETINFO\n";
	let output = run_conversation(NullRemote, input).await;
	assert_eq!(output, format!("VERSION 1\n{}", "UNSUPPORTED-REQUEST\n".repeat(8)));
}

/// Remote implementing the simple informational capabilities.
struct CapableRemote;

#[async_trait]
impl SpecialRemote for CapableRemote {
	async fn init(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Ok(())
	}
	async fn prepare(&self, _annex: &mut Annex<'_>) -> RemoteResult<()> {
		Ok(())
	}
	async fn store(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Ok(())
	}
	async fn retrieve(&self, _a: &mut Annex<'_>, _key: &str, _file: &str) -> RemoteResult<()> {
		Ok(())
	}
	async fn present(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<bool> {
		Ok(false)
	}
	async fn remove(&self, _annex: &mut Annex<'_>, _key: &str) -> RemoteResult<()> {
		Ok(())
	}

	fn as_extensions(&self) -> Option<&dyn HasExtensions> {
		Some(self)
	}
	fn as_list_configs(&self) -> Option<&dyn HasListConfigs> {
		Some(self)
	}
	fn as_get_cost(&self) -> Option<&dyn HasGetCost> {
		Some(self)
	}
	fn as_get_availability(&self) -> Option<&dyn HasGetAvailability> {
		Some(self)
	}
	fn as_claim_url(&self) -> Option<&dyn HasClaimUrl> {
		Some(self)
	}
	fn as_whereis(&self) -> Option<&dyn HasWhereis> {
		Some(self)
	}
	fn as_get_info(&self) -> Option<&dyn HasGetInfo> {
		Some(self)
	}
}

#[async_trait]
impl HasExtensions for CapableRemote {
	async fn extensions(&self, _annex: &mut Annex<'_>, extensions: &[String]) -> Vec<String> {
		assert_eq!(extensions, ["INFO", "ASYNC"]);
		vec![EXT_INFO.to_string(), EXT_ASYNC.to_string()]
	}
}

#[async_trait]
impl HasListConfigs for CapableRemote {
	async fn list_configs(&self, _annex: &mut Annex<'_>) -> Vec<ConfigSetting> {
		vec![
			ConfigSetting {
				name: "root".to_string(),
				description: "the root directory".to_string(),
			},
			ConfigSetting { name: "cost".to_string(), description: "transfer cost".to_string() },
		]
	}
}

#[async_trait]
impl HasGetCost for CapableRemote {
	async fn get_cost(&self, _annex: &mut Annex<'_>) -> u32 {
		150
	}
}

#[async_trait]
impl HasGetAvailability for CapableRemote {
	async fn get_availability(&self, _annex: &mut Annex<'_>) -> Availability {
		Availability::Locally
	}
}

#[async_trait]
impl HasClaimUrl for CapableRemote {
	async fn claim_url(&self, _annex: &mut Annex<'_>, url: &str) -> bool {
		url.starts_with("demo://")
	}
}

#[async_trait]
impl HasWhereis for CapableRemote {
	async fn whereis(&self, _annex: &mut Annex<'_>, key: &str) -> String {
		if key == "known" {
			"in the demo store".to_string()
		} else {
			String::new()
		}
	}
}

#[async_trait]
impl HasGetInfo for CapableRemote {
	async fn get_info(&self, _annex: &mut Annex<'_>) -> Vec<InfoField> {
		vec![InfoField { name: "repository".to_string(), value: "demo".to_string() }]
	}
}

#[tokio::test]
async fn test_extensions_round_trip() {
	let output = run_conversation(CapableRemote, "EXTENSIONS INFO ASYNC\n").await;
	assert_eq!(output, "VERSION 1\nEXTENSIONS INFO ASYNC\n");
}

#[tokio::test]
async fn test_listconfigs_streams_and_terminates() {
	let output = run_conversation(CapableRemote, "LISTCONFIGS\n").await;
	assert_eq!(
		output,
		"VERSION 1\n\
		 CONFIG root the root directory\n\
		 CONFIG cost transfer cost\n\
		 CONFIGEND\n"
	);
}

#[tokio::test]
async fn test_getcost_and_getavailability() {
	let output = run_conversation(CapableRemote, "GETCOST\nGETAVAILABILITY\n").await;
	assert_eq!(output, "VERSION 1\nCOST 150\nAVAILABILITY LOCALLY\n");
}

#[tokio::test]
async fn test_claimurl_success_and_failure() {
	let output =
		run_conversation(CapableRemote, "CLAIMURL demo://thing\nCLAIMURL http://other\n").await;
	assert_eq!(output, "VERSION 1\nCLAIMURL-SUCCESS\nCLAIMURL-FAILURE\n");
}

#[tokio::test]
async fn test_whereis_success_and_failure() {
	let output = run_conversation(CapableRemote, "WHEREIS known\nWHEREIS lost\n").await;
	assert_eq!(
		output,
		"VERSION 1\nWHEREIS-SUCCESS in the demo store\nWHEREIS-FAILURE\n"
	);
}

#[tokio::test]
async fn test_getinfo_streams_fields() {
	let output = run_conversation(CapableRemote, "GETINFO\n").await;
	assert_eq!(
		output,
		"VERSION 1\nINFOFIELD repository\nINFOVALUE demo\nINFOEND\n"
	);
}

// vim: ts=4
