//! Client-facing configuration and subscription types.
mod commit_stream;
mod options;
mod types;

pub use commit_stream::create_commit_stream;
pub use commit_stream::CommitStream;
pub use commit_stream::CommitStreamPublisher;
pub use options::ClusterOptions;
pub use options::OptionsError;
pub use types::ClusterInfo;
pub use types::MemberInfo;

pub(crate) use options::ClusterOptionsValidated;
