use crate::cluster::clock::Clock;
use crate::cluster::node::{AppendError, ClusterNode, CurrentLeader, Destination, Outbound, RoleKind};
use crate::cluster::transport::Transport;
use crate::cluster::types::Term;
use crate::codec::encode_resend;
use crate::commitlog::{LogStore, Position};
use crate::dispatch::RaftSubscriber;
use bytes::{Bytes, BytesMut};
use rand::Rng;
use std::io;
use std::time::Duration;

/// Owns the node and its transport, and drives both from a single-threaded
/// cooperative tick loop. Each tick drains a bounded batch of inbound frames,
/// advances timers, then flushes queued outbound messages to the wire.
///
/// No internal locking anywhere: one driver, one thread, total ordering of
/// all state transitions.
pub struct ClusterDriver<S: LogStore, C: Clock, R: Rng, T: Transport> {
    logger: slog::Logger,
    subscriber: RaftSubscriber<ClusterNode<S, C, R>>,
    transport: T,
    encode_buf: BytesMut,
}

impl<S: LogStore, C: Clock, R: Rng, T: Transport> ClusterDriver<S, C, R, T> {
    pub fn new(logger: slog::Logger, node: ClusterNode<S, C, R>, transport: T) -> Self {
        let subscriber = RaftSubscriber::new(logger.clone(), node);
        ClusterDriver {
            logger,
            subscriber,
            transport,
            encode_buf: BytesMut::new(),
        }
    }

    /// One cooperative pass. Inbound draining is bounded so a flood of peer
    /// traffic cannot starve the timers.
    pub fn tick(&mut self) {
        let batch_limit = self.subscriber.handler().max_inbound_batch();
        for _ in 0..batch_limit {
            match self.transport.poll_inbound() {
                Some((frame, _sender)) => self.subscriber.on_frame(&frame),
                None => break,
            }
        }

        self.subscriber.handler_mut().poll_timers();
        self.flush_outbox();
    }

    /// Leader-only append. On success the new log end is pushed to peers on
    /// an immediate heartbeat rather than waiting out the interval.
    pub fn append(&mut self, data: &[u8]) -> Result<Position, AppendError> {
        let new_end = self.subscriber.handler_mut().append(data)?;
        self.subscriber.handler_mut().poll_timers();
        self.flush_outbox();
        Ok(new_end)
    }

    pub fn current_role(&self) -> RoleKind {
        self.subscriber.handler().current_role()
    }

    pub fn current_leader(&self) -> CurrentLeader {
        self.subscriber.handler().current_leader()
    }

    pub fn current_term(&self) -> Term {
        self.subscriber.handler().current_term()
    }

    pub fn end_position(&self) -> Position {
        self.subscriber.handler().end_position()
    }

    pub fn committed_position(&self) -> Position {
        self.subscriber.handler().committed_position()
    }

    pub fn read_from(&self, start: Position) -> Result<Bytes, io::Error> {
        self.subscriber.handler().read_from(start)
    }

    /// Paced production loop. Never returns; intended to be spawned as the
    /// dedicated consensus task.
    pub async fn run(mut self, tick_interval: Duration) {
        loop {
            self.tick();
            tokio::time::sleep(tick_interval).await;
        }
    }

    fn flush_outbox(&mut self) {
        for frame in self.subscriber.handler_mut().drain_outbox() {
            self.encode_buf.clear();
            match &frame.message {
                Outbound::RequestVote(m) => m.encode_into(&mut self.encode_buf),
                Outbound::ReplyVote(m) => m.encode_into(&mut self.encode_buf),
                Outbound::ConsensusHeartbeat(m) => m.encode_into(&mut self.encode_buf),
                Outbound::MessageAcknowledgement(m) => m.encode_into(&mut self.encode_buf),
                Outbound::Resend { fields, body } => encode_resend(fields, body, &mut self.encode_buf),
            }

            let sent = match frame.destination {
                Destination::Peer(node_id) => self.transport.send(node_id, &self.encode_buf),
                Destination::Broadcast => self.transport.broadcast(&self.encode_buf),
            };
            if let Err(transport_error) = sent {
                // Lossy by contract. The protocol recovers via heartbeat and
                // resend; nothing to do but note it.
                slog::warn!(
                    self.logger,
                    "Failed to send frame to {:?}: {}",
                    frame.destination,
                    transport_error
                );
            }
        }
    }
}
