//! Protocol line framing
//!
//! Lines are a command token plus space-separated arguments. Embedded
//! newlines in any field travel as the two-character sequence `\n`; the
//! terminating newline belongs to the stream layer, not to this module.
//!
//! Argument parsing uses a bounded split: a handler declaring `k` arguments
//! consumes the command token plus the first `k - 1` spaces, and everything
//! after that belongs to the last argument verbatim. Only the space
//! character separates fields; tabs and other whitespace are data.

/// Encode a command and its arguments into a single wire line.
///
/// Arguments are joined with single spaces, so an empty trailing argument
/// produces a trailing space. Every literal newline in the result is
/// escaped to `\n`.
pub(crate) fn encode(cmd: &str, args: &[&str]) -> String {
	let mut line = String::from(cmd);
	for arg in args {
		line.push(' ');
		line.push_str(arg);
	}
	if line.contains('\n') {
		line = line.replace('\n', "\\n");
	}
	line
}

/// Split an argument string into exactly `count` fields.
///
/// The split is bounded: the final field keeps any internal spaces. When
/// the input has fewer than `count` fields, the missing trailing positions
/// are empty strings; this is how the protocol treats omitted optional
/// arguments (an `EXTENSIONS` line with no body, for example).
pub(crate) fn split_args(s: &str, count: usize) -> Vec<&str> {
	if count == 0 {
		return Vec::new();
	}
	let mut fields: Vec<&str> = s.splitn(count, ' ').collect();
	while fields.len() < count {
		fields.push("");
	}
	fields
}

/// Decode a wire line into its command token and `count` bounded arguments.
pub(crate) fn decode(line: &str, count: usize) -> (&str, Vec<&str>) {
	let mut split = line.splitn(2, ' ');
	let cmd = split.next().unwrap_or("");
	let rest = split.next().unwrap_or("");
	(cmd, split_args(rest, count))
}


// vim: ts=4
