mod api;
mod cluster;
mod codec;
mod commitlog;
mod dispatch;

pub use api::ClusterInfo;
pub use api::ClusterOptions;
pub use api::CommitStream;
pub use api::MemberInfo;
pub use api::OptionsError;
pub use cluster::AckStatus;
pub use cluster::AppendError;
pub use cluster::Clock;
pub use cluster::ClusterDriver;
pub use cluster::ClusterNode;
pub use cluster::CurrentLeader;
pub use cluster::Destination;
pub use cluster::InProcessNetwork;
pub use cluster::InProcessTransport;
pub use cluster::ManualClock;
pub use cluster::MonotonicClock;
pub use cluster::NodeConfig;
pub use cluster::NodeId;
pub use cluster::Outbound;
pub use cluster::OutboundFrame;
pub use cluster::RoleKind;
pub use cluster::SessionId;
pub use cluster::Term;
pub use cluster::Transport;
pub use cluster::TransportError;
pub use cluster::Vote;
pub use codec::decode;
pub use codec::encode_resend;
pub use codec::ConsensusHeartbeat;
pub use codec::FrameHeader;
pub use codec::FramingError;
pub use codec::MessageAcknowledgement;
pub use codec::RaftMessage;
pub use codec::ReplyVote;
pub use codec::RequestVote;
pub use codec::Resend;
pub use commitlog::InMemoryLogStore;
pub use commitlog::LogStore;
pub use commitlog::Position;
pub use commitlog::ReplicatedLog;
pub use dispatch::RaftHandler;
pub use dispatch::RaftSubscriber;
