//! Incremental framing parser for the event stream.
//!
//! The stream body arrives as arbitrary byte chunks. Records are separated by
//! a blank line; within a record, `field: value` lines accumulate into the
//! record and `:`-prefixed lines are comments (the server uses these as
//! keepalives). The parser consumes only complete records and retains the
//! trailing partial record across `feed` calls, so it survives any chunking
//! the transport produces. Dropping the parser discards the partial buffer,
//! which is exactly the abort semantics the connection needs.

/// One decoded stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
	/// Event name, `"message"` unless the record set one explicitly.
	pub event: String,
	/// `data` lines joined with `\n`. Empty if the record carried none.
	pub data: String,
	/// Value of the record's `id` field, if any.
	pub id: Option<String>,
	/// Whether the record carried at least one `data` line.
	pub has_data: bool,
}

/// Restartable record parser over an append-only byte buffer.
#[derive(Debug, Default)]
pub struct EventFrameParser {
	buf: Vec<u8>,
	/// Set when the previous chunk ended in a CR, so a leading LF in the next
	/// chunk is the tail of an already-normalized CRLF pair.
	pending_cr: bool,
}

impl EventFrameParser {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feed a chunk of bytes, returning every record it completed.
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
		for &byte in chunk {
			match byte {
				b'\r' => {
					self.buf.push(b'\n');
					self.pending_cr = true;
				}
				b'\n' if self.pending_cr => {
					self.pending_cr = false;
				}
				_ => {
					self.buf.push(byte);
					self.pending_cr = false;
				}
			}
		}

		let mut records = Vec::new();
		while let Some(end) = find_blank_line(&self.buf) {
			let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
			// A newline byte never occurs inside a multi-byte UTF-8 sequence,
			// so the record slice is valid text whenever the input was.
			let text = String::from_utf8_lossy(&raw[..end]);
			if let Some(record) = parse_record(&text) {
				records.push(record);
			}
		}
		records
	}
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
	buf.windows(2).position(|pair| pair == b"\n\n")
}

/// Parse one complete record. Returns None for records that are entirely
/// comments or blank, which the caller has nothing to do with.
fn parse_record(text: &str) -> Option<StreamRecord> {
	let mut event: Option<String> = None;
	let mut id: Option<String> = None;
	let mut data_lines: Vec<&str> = Vec::new();
	let mut saw_field = false;

	for line in text.split('\n') {
		if line.is_empty() || line.starts_with(':') {
			continue;
		}
		saw_field = true;

		let (field, value) = match line.find(':') {
			Some(pos) => {
				let value = &line[pos + 1..];
				(&line[..pos], value.strip_prefix(' ').unwrap_or(value))
			}
			None => (line, ""),
		};

		match field {
			"event" => event = Some(value.to_string()),
			"id" => id = Some(value.to_string()),
			"data" => data_lines.push(value),
			_ => {}
		}
	}

	if !saw_field {
		return None;
	}

	Some(StreamRecord {
		event: event.unwrap_or_else(|| "message".to_string()),
		has_data: !data_lines.is_empty(),
		data: data_lines.join("\n"),
		id,
	})
}
