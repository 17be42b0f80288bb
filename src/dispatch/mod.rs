use crate::cluster::{AckStatus, NodeId, SessionId, Term, Vote};
use crate::codec::{decode, RaftMessage};
use crate::commitlog::Position;

/// Typed callback set for the five replication message kinds. The role state
/// machine implements this; all arguments arrive fully decoded except the
/// Resend body, which is a zero-copy view valid only for the duration of the
/// call.
pub trait RaftHandler {
    fn on_request_vote(
        &mut self,
        candidate_id: NodeId,
        candidate_session_id: SessionId,
        term: Term,
        last_acked_position: Position,
    );

    fn on_reply_vote(&mut self, sender_node_id: NodeId, candidate_id: NodeId, term: Term, vote: Vote);

    fn on_consensus_heartbeat(
        &mut self,
        node_id: NodeId,
        term: Term,
        position: Position,
        leader_session_id: SessionId,
    );

    fn on_message_acknowledgement(&mut self, new_acked_position: Position, node_id: NodeId, status: AckStatus);

    fn on_resend(&mut self, leader_session_id: SessionId, term: Term, start_position: Position, body: &[u8]);
}

/// Decodes inbound framed buffers and fans them out to a RaftHandler.
/// Malformed frames are dropped with a warning; unknown template ids are
/// skipped silently for forward compatibility.
pub struct RaftSubscriber<H: RaftHandler> {
    logger: slog::Logger,
    handler: H,
}

impl<H: RaftHandler> RaftSubscriber<H> {
    pub fn new(logger: slog::Logger, handler: H) -> Self {
        RaftSubscriber { logger, handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn on_frame(&mut self, buf: &[u8]) {
        match decode(buf) {
            Ok(RaftMessage::RequestVote(m)) => {
                self.handler
                    .on_request_vote(m.candidate_id, m.candidate_session_id, m.term, m.last_acked_position);
            }
            Ok(RaftMessage::ReplyVote(m)) => {
                self.handler
                    .on_reply_vote(m.sender_node_id, m.candidate_id, m.term, m.vote);
            }
            Ok(RaftMessage::ConsensusHeartbeat(m)) => {
                self.handler
                    .on_consensus_heartbeat(m.node_id, m.term, m.position, m.leader_session_id);
            }
            Ok(RaftMessage::MessageAcknowledgement(m)) => {
                self.handler
                    .on_message_acknowledgement(m.new_acked_position, m.node_id, m.status);
            }
            Ok(RaftMessage::Resend { fields, body }) => {
                self.handler
                    .on_resend(fields.leader_session_id, fields.term, fields.start_position, body);
            }
            Ok(RaftMessage::Unknown { template_id }) => {
                slog::debug!(self.logger, "Ignoring unknown template id {}", template_id);
            }
            Err(framing_error) => {
                slog::warn!(self.logger, "Dropping malformed frame: {}", framing_error);
            }
        }
    }
}
