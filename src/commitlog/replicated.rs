use crate::commitlog::{LogStore, Position};
use bytes::Bytes;
use std::cmp;
use std::io;

/// ReplicatedLog tracks the two positions the consensus layer cares about on
/// top of a durable byte store: the log end (highest position written) and
/// the commit position (highest position acknowledged by a majority).
///
/// Append never blocks on peer acknowledgement; commit advancement is a
/// separate ratchet driven by the leader's ack bookkeeping.
pub struct ReplicatedLog<S: LogStore> {
    store: S,
    end_position: Position,
    commit_position: Position,
    // When set, follower-side appends flush the store before returning, so
    // an acknowledgement implies durability. Deployment-time trade-off.
    durable_ack: bool,
}

impl<S: LogStore> ReplicatedLog<S> {
    pub fn new(store: S, durable_ack: bool) -> Self {
        let end_position = store.last_persisted_position();
        ReplicatedLog {
            store,
            end_position,
            commit_position: Position::zero(),
            durable_ack,
        }
    }

    pub fn end_position(&self) -> Position {
        self.end_position
    }

    pub fn committed_position(&self) -> Position {
        self.commit_position
    }

    /// Leader-only append of an opaque entry. Returns the new log end, which
    /// is the position the leader asserts in its next heartbeat.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Position, io::Error> {
        self.store.persist(self.end_position, bytes)?;
        // End only advances after the bytes are fully visible in the store,
        // so a racing Resend reader never sees a torn entry.
        self.end_position = self.end_position.plus(bytes.len() as u64);
        Ok(self.end_position)
    }

    /// Follower-side append of resent log bytes starting at `start`. Any
    /// divergent local suffix at/after `start` is discarded first. Returns
    /// the new log end to acknowledge.
    pub fn append_from(&mut self, start: Position, bytes: &[u8]) -> Result<Position, io::Error> {
        if start < self.end_position {
            self.store.truncate_from(start)?;
            self.end_position = start;
        }
        self.store.persist(self.end_position, bytes)?;
        if self.durable_ack {
            self.store.flush()?;
        }
        self.end_position = self.end_position.plus(bytes.len() as u64);
        // Truncation may have dropped below a previously known commit point;
        // that only happens to uncommitted suffixes in practice, but clamp
        // regardless so the two counters stay consistent.
        self.commit_position = cmp::min(self.commit_position, self.end_position);
        Ok(self.end_position)
    }

    /// Raw log bytes from `start` to the current end, for a Resend.
    pub fn read_from(&self, start: Position) -> Result<Bytes, io::Error> {
        let start = cmp::min(start, self.end_position);
        self.store.read_range(start, self.end_position)
    }

    /// Discard everything at/after `position`. Used when a newly recognized
    /// leader's log end is behind ours: the local suffix is an uncommitted
    /// leftover from a deposed leadership run.
    pub fn truncate_to(&mut self, position: Position) -> Result<(), io::Error> {
        if position >= self.end_position {
            return Ok(());
        }
        self.store.truncate_from(position)?;
        self.end_position = position;
        self.commit_position = cmp::min(self.commit_position, self.end_position);
        Ok(())
    }

    /// Move the commit position forward, never backward. Returns true if it
    /// advanced.
    pub fn ratchet_commit(&mut self, position: Position) -> bool {
        let position = cmp::min(position, self.end_position);
        if position > self.commit_position {
            self.commit_position = position;
            true
        } else {
            false
        }
    }
}
