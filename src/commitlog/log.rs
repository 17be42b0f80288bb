use bytes::Bytes;
use std::{fmt, io};

/// Position is a byte offset into the replicated log's single append-only
/// stream. Leader-assigned and totally ordered; heartbeats and acks carry
/// stream ends, and Resend ships the raw bytes from a given position.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Position(u64);

impl Position {
    pub fn new(position: u64) -> Self {
        Position(position)
    }

    pub fn zero() -> Self {
        Position(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn plus(&self, delta: u64) -> Position {
        Position(self.0 + delta)
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// LogStore is the durable storage collaborator behind the replicated log.
///
/// The replicated log only advances its end position after `persist` returns,
/// so a concurrent reader driving a Resend never observes a torn entry.
pub trait LogStore {
    /// Persist `bytes` starting at `position`. The position is always the
    /// store's current end; the log never writes with gaps.
    fn persist(&mut self, position: Position, bytes: &[u8]) -> Result<(), io::Error>;

    /// Read the raw byte range `[start, end)`.
    fn read_range(&self, start: Position, end: Position) -> Result<Bytes, io::Error>;

    /// Discard everything at and after `position`.
    fn truncate_from(&mut self, position: Position) -> Result<(), io::Error>;

    /// Highest position durably stored. Used to re-hydrate the log end at
    /// startup.
    fn last_persisted_position(&self) -> Position;

    /// Force buffered writes down to durable media. No-op for stores that
    /// persist synchronously.
    fn flush(&mut self) -> Result<(), io::Error>;
}
