use crate::commitlog::{LogStore, Position};
use bytes::Bytes;
use std::io;

/// In-memory LogStore backed by a plain byte vector. Suitable for tests and
/// for deployments where a surviving majority is the durability story.
pub struct InMemoryLogStore {
    buf: Vec<u8>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        InMemoryLogStore { buf: Vec::new() }
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for InMemoryLogStore {
    fn persist(&mut self, position: Position, bytes: &[u8]) -> Result<(), io::Error> {
        if position.as_u64() != self.buf.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "persist at {:?} but store ends at {}",
                    position,
                    self.buf.len()
                ),
            ));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn read_range(&self, start: Position, end: Position) -> Result<Bytes, io::Error> {
        let start = start.as_u64() as usize;
        let end = end.as_u64() as usize;
        if start > end || end > self.buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read range [{}, {}) beyond store end {}", start, end, self.buf.len()),
            ));
        }
        Ok(Bytes::copy_from_slice(&self.buf[start..end]))
    }

    fn truncate_from(&mut self, position: Position) -> Result<(), io::Error> {
        let position = position.as_u64() as usize;
        if position < self.buf.len() {
            self.buf.truncate(position);
        }
        Ok(())
    }

    fn last_persisted_position(&self) -> Position {
        Position::new(self.buf.len() as u64)
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}
