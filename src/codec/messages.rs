use crate::cluster::{AckStatus, NodeId, SessionId, Term, Vote};
use crate::codec::frame::{FrameHeader, FramingError, HEADER_LENGTH};
use crate::commitlog::Position;
use bytes::BufMut;
use bytes::BytesMut;

pub(crate) const REQUEST_VOTE_TEMPLATE_ID: u16 = 50;
pub(crate) const REPLY_VOTE_TEMPLATE_ID: u16 = 51;
pub(crate) const CONSENSUS_HEARTBEAT_TEMPLATE_ID: u16 = 52;
pub(crate) const MESSAGE_ACKNOWLEDGEMENT_TEMPLATE_ID: u16 = 53;
pub(crate) const RESEND_TEMPLATE_ID: u16 = 54;

const REQUEST_VOTE_BLOCK_LENGTH: u16 = 26;
const REPLY_VOTE_BLOCK_LENGTH: u16 = 13;
const CONSENSUS_HEARTBEAT_BLOCK_LENGTH: u16 = 26;
const MESSAGE_ACKNOWLEDGEMENT_BLOCK_LENGTH: u16 = 11;
const RESEND_BLOCK_LENGTH: u16 = 24;
const RESEND_BODY_HEADER_LENGTH: usize = 4;

/// A candidate soliciting votes for `term`. `last_acked_position` is the
/// candidate's log end; voters refuse candidates whose log is behind theirs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestVote {
    pub candidate_id: NodeId,
    pub candidate_session_id: SessionId,
    pub term: Term,
    pub last_acked_position: Position,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplyVote {
    pub sender_node_id: NodeId,
    pub candidate_id: NodeId,
    pub term: Term,
    pub vote: Vote,
}

/// Periodic leader assertion. `position` is the leader's current log end;
/// followers compare it against their own end to detect gaps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsensusHeartbeat {
    pub node_id: NodeId,
    pub term: Term,
    pub position: Position,
    pub leader_session_id: SessionId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageAcknowledgement {
    pub new_acked_position: Position,
    pub node_id: NodeId,
    pub status: AckStatus,
}

/// Fixed fields of a Resend. The variable-length body (raw log bytes from
/// `start_position`) travels after the fixed block, length-prefixed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resend {
    pub leader_session_id: SessionId,
    pub term: Term,
    pub start_position: Position,
}

/// One decoded replication frame. The Resend body is a view into the input
/// buffer, never a copy; it must not outlive the buffer it was decoded from.
#[derive(Debug, Eq, PartialEq)]
pub enum RaftMessage<'a> {
    RequestVote(RequestVote),
    ReplyVote(ReplyVote),
    ConsensusHeartbeat(ConsensusHeartbeat),
    MessageAcknowledgement(MessageAcknowledgement),
    Resend { fields: Resend, body: &'a [u8] },
    /// Template id this node doesn't know. Skipped for forward compatibility
    /// with newer peers.
    Unknown { template_id: u16 },
}

impl RequestVote {
    pub fn encode_into(&self, out: &mut BytesMut) {
        FrameHeader::for_template(REQUEST_VOTE_TEMPLATE_ID, REQUEST_VOTE_BLOCK_LENGTH).encode_into(out);
        out.put_u16_le(self.candidate_id.as_u16());
        out.put_u64_le(self.candidate_session_id.as_u64());
        out.put_u64_le(self.term.as_u64());
        out.put_u64_le(self.last_acked_position.as_u64());
    }
}

impl ReplyVote {
    pub fn encode_into(&self, out: &mut BytesMut) {
        FrameHeader::for_template(REPLY_VOTE_TEMPLATE_ID, REPLY_VOTE_BLOCK_LENGTH).encode_into(out);
        out.put_u16_le(self.sender_node_id.as_u16());
        out.put_u16_le(self.candidate_id.as_u16());
        out.put_u64_le(self.term.as_u64());
        out.put_u8(vote_to_wire(self.vote));
    }
}

impl ConsensusHeartbeat {
    pub fn encode_into(&self, out: &mut BytesMut) {
        FrameHeader::for_template(CONSENSUS_HEARTBEAT_TEMPLATE_ID, CONSENSUS_HEARTBEAT_BLOCK_LENGTH)
            .encode_into(out);
        out.put_u16_le(self.node_id.as_u16());
        out.put_u64_le(self.term.as_u64());
        out.put_u64_le(self.position.as_u64());
        out.put_u64_le(self.leader_session_id.as_u64());
    }
}

impl MessageAcknowledgement {
    pub fn encode_into(&self, out: &mut BytesMut) {
        FrameHeader::for_template(MESSAGE_ACKNOWLEDGEMENT_TEMPLATE_ID, MESSAGE_ACKNOWLEDGEMENT_BLOCK_LENGTH)
            .encode_into(out);
        out.put_u64_le(self.new_acked_position.as_u64());
        out.put_u16_le(self.node_id.as_u16());
        out.put_u8(ack_status_to_wire(self.status));
    }
}

pub fn encode_resend(fields: &Resend, body: &[u8], out: &mut BytesMut) {
    FrameHeader::for_template(RESEND_TEMPLATE_ID, RESEND_BLOCK_LENGTH).encode_into(out);
    out.put_u64_le(fields.leader_session_id.as_u64());
    out.put_u64_le(fields.term.as_u64());
    out.put_u64_le(fields.start_position.as_u64());
    out.put_u32_le(body.len() as u32);
    out.put_slice(body);
}

/// Decode a single framed buffer into a typed message. The declared block
/// length is trusted to locate the variable section, so frames from newer
/// peers with longer fixed blocks still parse; declared lengths that overrun
/// the buffer are a framing error.
pub fn decode(buf: &[u8]) -> Result<RaftMessage<'_>, FramingError> {
    let header = FrameHeader::decode(buf)?;
    let block = fixed_block(buf, &header)?;

    match header.template_id {
        REQUEST_VOTE_TEMPLATE_ID => {
            require_block(&header, REQUEST_VOTE_BLOCK_LENGTH)?;
            Ok(RaftMessage::RequestVote(RequestVote {
                candidate_id: NodeId::new(read_u16(block, 0)),
                candidate_session_id: SessionId::new(read_u64(block, 2)),
                term: Term::new(read_u64(block, 10)),
                last_acked_position: Position::new(read_u64(block, 18)),
            }))
        }
        REPLY_VOTE_TEMPLATE_ID => {
            require_block(&header, REPLY_VOTE_BLOCK_LENGTH)?;
            Ok(RaftMessage::ReplyVote(ReplyVote {
                sender_node_id: NodeId::new(read_u16(block, 0)),
                candidate_id: NodeId::new(read_u16(block, 2)),
                term: Term::new(read_u64(block, 4)),
                vote: vote_from_wire(block[12])?,
            }))
        }
        CONSENSUS_HEARTBEAT_TEMPLATE_ID => {
            require_block(&header, CONSENSUS_HEARTBEAT_BLOCK_LENGTH)?;
            Ok(RaftMessage::ConsensusHeartbeat(ConsensusHeartbeat {
                node_id: NodeId::new(read_u16(block, 0)),
                term: Term::new(read_u64(block, 2)),
                position: Position::new(read_u64(block, 10)),
                leader_session_id: SessionId::new(read_u64(block, 18)),
            }))
        }
        MESSAGE_ACKNOWLEDGEMENT_TEMPLATE_ID => {
            require_block(&header, MESSAGE_ACKNOWLEDGEMENT_BLOCK_LENGTH)?;
            Ok(RaftMessage::MessageAcknowledgement(MessageAcknowledgement {
                new_acked_position: Position::new(read_u64(block, 0)),
                node_id: NodeId::new(read_u16(block, 8)),
                status: ack_status_from_wire(block[10])?,
            }))
        }
        RESEND_TEMPLATE_ID => {
            require_block(&header, RESEND_BLOCK_LENGTH)?;
            let fields = Resend {
                leader_session_id: SessionId::new(read_u64(block, 0)),
                term: Term::new(read_u64(block, 8)),
                start_position: Position::new(read_u64(block, 16)),
            };
            let body = variable_body(buf, &header)?;
            Ok(RaftMessage::Resend { fields, body })
        }
        template_id => Ok(RaftMessage::Unknown { template_id }),
    }
}

fn fixed_block<'a>(buf: &'a [u8], header: &FrameHeader) -> Result<&'a [u8], FramingError> {
    let block_end = HEADER_LENGTH + header.block_length as usize;
    if buf.len() < block_end {
        return Err(FramingError::Truncated {
            needed: block_end,
            available: buf.len(),
        });
    }
    Ok(&buf[HEADER_LENGTH..block_end])
}

fn require_block(header: &FrameHeader, required: u16) -> Result<(), FramingError> {
    if header.block_length < required {
        return Err(FramingError::BlockTooShort {
            template_id: header.template_id,
            block_length: header.block_length,
        });
    }
    Ok(())
}

fn variable_body<'a>(buf: &'a [u8], header: &FrameHeader) -> Result<&'a [u8], FramingError> {
    let body_header_offset = HEADER_LENGTH + header.block_length as usize;
    let body_offset = body_header_offset + RESEND_BODY_HEADER_LENGTH;
    if buf.len() < body_offset {
        return Err(FramingError::Truncated {
            needed: body_offset,
            available: buf.len(),
        });
    }
    let declared = u32::from_le_bytes([
        buf[body_header_offset],
        buf[body_header_offset + 1],
        buf[body_header_offset + 2],
        buf[body_header_offset + 3],
    ]) as usize;
    if buf.len() < body_offset + declared {
        return Err(FramingError::BodyOverrun {
            declared,
            available: buf.len() - body_offset,
        });
    }
    Ok(&buf[body_offset..body_offset + declared])
}

fn read_u16(block: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([block[offset], block[offset + 1]])
}

fn read_u64(block: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&block[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn vote_to_wire(vote: Vote) -> u8 {
    match vote {
        Vote::Denied => 0,
        Vote::Granted => 1,
    }
}

fn vote_from_wire(value: u8) -> Result<Vote, FramingError> {
    match value {
        0 => Ok(Vote::Denied),
        1 => Ok(Vote::Granted),
        value => Err(FramingError::BadEnumValue { field: "vote", value }),
    }
}

fn ack_status_to_wire(status: AckStatus) -> u8 {
    match status {
        AckStatus::Ok => 0,
        AckStatus::MissingLogEntries => 1,
        AckStatus::Error => 2,
    }
}

fn ack_status_from_wire(value: u8) -> Result<AckStatus, FramingError> {
    match value {
        0 => Ok(AckStatus::Ok),
        1 => Ok(AckStatus::MissingLogEntries),
        2 => Ok(AckStatus::Error),
        value => Err(FramingError::BadEnumValue { field: "status", value }),
    }
}
