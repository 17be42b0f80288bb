mod in_memory;
mod log;
mod replicated;

pub use in_memory::InMemoryLogStore;
pub use log::LogStore;
pub use log::Position;
pub use replicated::ReplicatedLog;
