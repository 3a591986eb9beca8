//! Engine error types
//!
//! Errors that terminate a protocol conversation. Errors returned by user
//! handler implementations are separate (boxed trait objects aliased per
//! protocol module) and are reported over the wire as `*-FAILURE` replies
//! rather than through this type.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io;

/// Fatal engine error
///
/// Any of these ends the conversation that produced it: the engine emits a
/// single unprefixed `ERROR failed: <detail>` line and stops reading.
#[derive(Debug)]
pub enum EngineError {
	/// I/O error on the underlying streams
	Io(io::Error),

	/// Protocol violation (unexpected token, bad job prefix, malformed reply)
	Protocol(String),

	/// The outbound writer is gone; nothing more can be sent
	ChannelClosed,
}

impl fmt::Display for EngineError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EngineError::Io(e) => write!(f, "I/O error: {}", e),
			EngineError::Protocol(msg) => write!(f, "{}", msg),
			EngineError::ChannelClosed => write!(f, "output channel closed"),
		}
	}
}

impl Error for EngineError {}

impl From<io::Error> for EngineError {
	fn from(e: io::Error) -> Self {
		EngineError::Io(e)
	}
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"handler panicked".to_string()
	}
}

// vim: ts=4
