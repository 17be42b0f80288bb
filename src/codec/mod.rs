mod frame;
mod messages;

pub use frame::FrameHeader;
pub use frame::FramingError;
pub use frame::HEADER_LENGTH;
pub use frame::SCHEMA_ID;
pub use frame::SCHEMA_VERSION;
pub use messages::decode;
pub use messages::encode_resend;
pub use messages::ConsensusHeartbeat;
pub use messages::MessageAcknowledgement;
pub use messages::RaftMessage;
pub use messages::ReplyVote;
pub use messages::RequestVote;
pub use messages::Resend;
