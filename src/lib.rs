//! # annex-external - git-annex external remotes and backends
//!
//! Build git-annex [external special remotes] and [external backends]
//! without touching the wire protocol. A user-supplied object fulfilling a
//! small set of capability contracts is driven by a dispatcher that speaks
//! the line-oriented protocol over stdin/stdout, multiplexes asynchronous
//! job-tagged conversations (the ASYNC extension), probes optional
//! capabilities, and performs callbacks back into git-annex.
//!
//! [external special remotes]: https://git-annex.branchable.com/design/external_special_remote_protocol/
//! [external backends]: https://git-annex.branchable.com/design/external_backend_protocol/
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use annex_external::remote::{self, Annex, RemoteResult, SpecialRemote};
//!
//! struct MyRemote;
//!
//! #[async_trait::async_trait]
//! impl SpecialRemote for MyRemote {
//! 	async fn init(&self, annex: &mut Annex<'_>) -> RemoteResult<()> { Ok(()) }
//! 	async fn prepare(&self, annex: &mut Annex<'_>) -> RemoteResult<()> { Ok(()) }
//! 	// store, retrieve, present, remove ...
//! }
//!
//! #[tokio::main]
//! async fn main() {
//! 	annex_external::logging::init_tracing();
//! 	remote::run(MyRemote).await.ok();
//! }
//! ```
//!
//! Optional protocol messages are enabled by implementing the matching
//! `Has*` trait from [`remote`] and overriding the corresponding `as_*`
//! probe on [`remote::SpecialRemote`]. Backends work the same way through
//! [`backend::Backend`].

pub mod backend;
mod codec;
pub mod error;
pub mod logging;
mod mux;
pub mod remote;

// Re-export commonly used types
pub use error::EngineError;

// vim: ts=4
