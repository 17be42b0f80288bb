use crate::commitlog::Position;
use tokio::sync::mpsc;

pub fn create_commit_stream() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = CommitStreamPublisher { sender: tx };
    let stream = CommitStream { receiver: rx };

    (publisher, stream)
}

/// Internal half: the role state machine publishes every commit advancement
/// here.
pub struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<Position>,
}

impl CommitStreamPublisher {
    pub fn notify_commit_advanced(&self, logger: &slog::Logger, position: Position) {
        if self.sender.send(position).is_err() {
            slog::warn!(logger, "CommitStream has disconnected.");
        }
    }
}

/// External half: the session layer subscribes to learn which log positions
/// are durably replicated and safe to act on.
pub struct CommitStream {
    receiver: mpsc::UnboundedReceiver<Position>,
}

impl CommitStream {
    /// Next committed position, awaiting if none is pending. `None` means
    /// the publishing node has shut down.
    pub async fn next(&mut self) -> Option<Position> {
        self.receiver.recv().await
    }

    /// Non-blocking variant for poll-style callers.
    pub fn try_next(&mut self) -> Option<Position> {
        self.receiver.try_recv().ok()
    }
}
