//! Stream I/O and async-job multiplexing
//!
//! One reader task routes inbound lines to per-job conversations, one
//! writer task serializes outbound lines from all conversations, and each
//! conversation talks through a [`JobLines`] handle.
//!
//! Job 0 is the main conversation. A line starting with `J <n>` belongs to
//! async job `n`; the first line seen for a new job id lazily spawns that
//! job's dispatcher. Outbound lines from a nonzero job are wrapped as
//! `J <n> <line>` so git-annex can route the reply, with one exception:
//! `ERROR` is never job-prefixed.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::EngineError;
use crate::logging::*;

/// Per-job inbound lines; the per-job protocol is strictly serial, so a
/// depth of one is enough and anything deeper only hides backpressure.
const INBOUND_DEPTH: usize = 1;

/// Shared outbound queue feeding the writer task.
const OUTBOUND_DEPTH: usize = 16;

/// One conversation's view of the shared streams.
///
/// Receives exactly the lines addressed to this job (with any `J <n>`
/// prefix already stripped) and sends lines that are prefixed on the way
/// out when the job id is nonzero.
pub(crate) struct JobLines {
	num: u64,
	input: mpsc::Receiver<String>,
	output: mpsc::Sender<String>,
}

impl JobLines {
	pub(crate) fn num(&self) -> u64 {
		self.num
	}

	/// Encode and queue one outbound line.
	pub(crate) async fn send(&self, cmd: &str, args: &[&str]) -> Result<(), EngineError> {
		let encoded = codec::encode(cmd, args);
		let line = if cmd != "ERROR" && self.num != 0 {
			format!("J {} {}", self.num, encoded)
		} else {
			encoded
		};
		self.output.send(line).await.map_err(|_| EngineError::ChannelClosed)
	}

	/// Receive the next line addressed to this job, or `None` on EOF.
	///
	/// For nonzero jobs the `J <n> ` prefix is stripped here so handlers
	/// see the same shape of command regardless of job id. A line that
	/// reaches this job without the expected prefix means the router and
	/// this conversation disagree about who the line belongs to, which is
	/// unrecoverable.
	pub(crate) async fn recv(&mut self) -> Result<Option<String>, EngineError> {
		let Some(line) = self.input.recv().await else {
			return Ok(None);
		};
		if self.num == 0 {
			return Ok(Some(line));
		}
		let prefix = format!("J {} ", self.num);
		match line.strip_prefix(&prefix) {
			Some(rest) => Ok(Some(rest.to_string())),
			None => Err(EngineError::Protocol(format!(
				"received line {:?} without correct prefix {:?}",
				line, prefix
			))),
		}
	}
}

/// Job id of an inbound line: the integer after a leading `J` token, or 0.
///
/// Unparsable job numbers fall back to the main conversation rather than
/// erroring; the main dispatcher will then reject `J` as an unknown
/// command.
pub(crate) fn job_number(line: &str) -> u64 {
	let mut split = line.splitn(3, ' ');
	if split.next() != Some("J") {
		return 0;
	}
	split.next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

/// Writer task: drain the outbound queue onto the stream, one line at a
/// time, flushing per line. Lines are written whole, so concurrent jobs
/// never tear each other's output.
async fn write_lines<W>(mut output: W, mut rx: mpsc::Receiver<String>) -> Result<(), EngineError>
where
	W: AsyncWrite + Unpin,
{
	while let Some(line) = rx.recv().await {
		debug!("-> {}", line);
		output.write_all(line.as_bytes()).await?;
		output.write_all(b"\n").await?;
		output.flush().await?;
	}
	Ok(())
}

/// Reader loop: route each inbound line to its job's conversation,
/// creating the conversation on first sight of a new job id.
async fn route_lines<R, F>(
	input: R,
	output: mpsc::Sender<String>,
	mut spawn_job: F,
) -> Result<(), EngineError>
where
	R: AsyncRead + Unpin,
	F: FnMut(JobLines) -> JoinHandle<()>,
{
	let mut reader = BufReader::new(input).lines();
	let mut jobs: HashMap<u64, mpsc::Sender<String>> = HashMap::new();
	let mut handles: Vec<JoinHandle<()>> = Vec::new();

	while let Some(line) = reader.next_line().await? {
		debug!("<- {}", line);
		let num = job_number(&line);
		let tx = jobs.entry(num).or_insert_with(|| {
			let (tx, rx) = mpsc::channel(INBOUND_DEPTH);
			let lines = JobLines { num, input: rx, output: output.clone() };
			handles.push(spawn_job(lines));
			tx
		});
		if tx.send(line).await.is_err() {
			// The conversation ended on a fatal error; drop the line but
			// keep serving the other jobs.
			debug!("job {} conversation is gone, dropping line", num);
			jobs.remove(&num);
		}
	}

	// EOF: closing the inbound channels lets every dispatcher finish its
	// current command and exit.
	drop(jobs);
	for handle in handles {
		let _ = handle.await;
	}
	Ok(())
}

/// Run one engine session over the given streams.
///
/// Wires up the writer task and the router, optionally emitting a greeting
/// line (the remote protocol's unsolicited `VERSION 1`) before any input
/// is read. Returns after EOF once every conversation has ended and the
/// writer has drained.
pub(crate) async fn run_session<R, W, F>(
	input: R,
	output: W,
	greeting: Option<&str>,
	spawn_job: F,
) -> Result<(), EngineError>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin + Send + 'static,
	F: FnMut(JobLines) -> JoinHandle<()>,
{
	let (out_tx, out_rx) = mpsc::channel(OUTBOUND_DEPTH);
	let writer = tokio::spawn(write_lines(output, out_rx));

	if let Some(line) = greeting {
		out_tx.send(line.to_string()).await.map_err(|_| EngineError::ChannelClosed)?;
	}

	let routed = route_lines(input, out_tx.clone(), spawn_job).await;
	if let Err(err) = &routed {
		error!("session failed: {}", err);
		let _ = out_tx.send(format!("ERROR failed: {}", err)).await;
	}

	// Close the queue so the writer drains what is left and exits.
	drop(out_tx);
	let flushed = match writer.await {
		Ok(result) => result,
		Err(err) => Err(EngineError::Protocol(format!("writer task panicked: {}", err))),
	};

	routed.and(flushed)
}


// vim: ts=4
