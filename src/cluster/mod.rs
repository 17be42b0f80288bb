mod clock;
mod driver;
mod node;
mod transport;
mod types;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::MonotonicClock;
pub use driver::ClusterDriver;
pub use node::AppendError;
pub use node::ClusterNode;
pub use node::CurrentLeader;
pub use node::Destination;
pub use node::NodeConfig;
pub use node::Outbound;
pub use node::OutboundFrame;
pub use node::RoleKind;
pub use transport::InProcessNetwork;
pub use transport::InProcessTransport;
pub use transport::Transport;
pub use transport::TransportError;
pub use types::AckStatus;
pub use types::NodeId;
pub use types::SessionId;
pub use types::Term;
pub use types::Vote;
