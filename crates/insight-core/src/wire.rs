//! Reading server-sent `StreamEvent`s back from an SSE body.
//!
//! The server frames each event as one JSON object on a `data:` line,
//! terminated by a blank line. Clients and tests decode with `FrameDecoder`.

use crate::stream::StreamEvent;

/// Incremental SSE decoder that tolerates frames split across chunks.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Feeds a chunk and returns the data payloads of every completed frame.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(data) = frame_data(&frame) {
                frames.push(data);
            }
        }
        frames
    }

    /// Feeds a chunk and parses every completed frame as a `StreamEvent`.
    pub fn push_events(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, serde_json::Error> {
        self.push_chunk(chunk)
            .iter()
            .map(|data| serde_json::from_str(data))
            .collect()
    }
}

/// Decodes a whole SSE body into events.
pub fn decode_events(body: &[u8]) -> Result<Vec<StreamEvent>, serde_json::Error> {
    FrameDecoder::default().push_events(body)
}

fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn frame_data(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let data_lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
