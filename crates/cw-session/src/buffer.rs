//! Rolling output buffer with a byte cap.
//!
//! Chunks are appended verbatim and trimmed from the front so the most recent
//! bytes survive. A single chunk larger than the cap is kept whole rather
//! than split; trimming only pops while more than one chunk is held.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct RollingBuffer {
    chunks: VecDeque<Vec<u8>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl RollingBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Append a raw chunk and trim the front down to the cap.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.total_bytes > self.max_bytes && self.chunks.len() > 1 {
            if let Some(oldest) = self.chunks.pop_front() {
                self.total_bytes -= oldest.len();
            }
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate all retained bytes.
    pub fn joined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Retained bytes as lossy UTF-8 text.
    pub fn joined_lossy(&self) -> String {
        String::from_utf8_lossy(&self.joined()).into_owned()
    }

    /// The last `tail_bytes` retained bytes as lossy UTF-8 text.
    pub fn tail_lossy(&self, tail_bytes: usize) -> String {
        let joined = self.joined();
        let start = joined.len().saturating_sub(tail_bytes);
        String::from_utf8_lossy(&joined[start..]).into_owned()
    }
}
