use crate::api::{
    create_commit_stream, ClusterInfo, ClusterOptions, ClusterOptionsValidated, CommitStream, CommitStreamPublisher,
    OptionsError,
};
use crate::cluster::clock::Clock;
use crate::cluster::types::{AckStatus, NodeId, SessionId, Term, Vote};
use crate::codec::{ConsensusHeartbeat, MessageAcknowledgement, ReplyVote, RequestVote, Resend};
use crate::commitlog::{LogStore, Position, ReplicatedLog};
use crate::dispatch::RaftHandler;
use bytes::Bytes;
use rand::Rng;
use std::cmp;
use std::collections::{HashMap, HashSet};
use std::convert::TryFrom;
use std::io;
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

/// The Follower/Candidate/Leader state machine. Owns the current term, the
/// vote record, the replicated log, and (as leader) the per-peer ack state.
///
/// Single-writer: all mutation happens from the ClusterDriver's tick loop on
/// one thread. Outbound messages are queued on an internal outbox and drained
/// by the driver; the node itself never touches the transport.
pub struct ClusterNode<S: LogStore, C: Clock, R: Rng> {
    logger: slog::Logger,
    my_id: NodeId,
    cluster_info: ClusterInfo,
    peer_ids: Vec<NodeId>,
    term: Term,
    voted_for_this_term: Option<NodeId>,
    role: Role,
    log: ReplicatedLog<S>,
    clock: C,
    rng: R,
    heartbeat_interval: Duration,
    election_timeout: RangeInclusive<Duration>,
    max_inbound_batch: usize,
    commit_publisher: CommitStreamPublisher,
    outbox: Vec<OutboundFrame>,
}

enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

struct FollowerState {
    /// The leader this follower currently recognizes, once a heartbeat for
    /// the current term has been accepted.
    leader: Option<(NodeId, SessionId)>,
    election_deadline: Duration,
}

struct CandidateState {
    /// Minted fresh at candidacy; becomes the leader session id on a win.
    session_id: SessionId,
    received_votes_from: HashSet<NodeId>,
    election_deadline: Duration,
}

struct LeaderState {
    session_id: SessionId,
    /// Highest position acknowledged by each peer. Rebuilt from scratch at
    /// every leadership takeover.
    acked: HashMap<NodeId, Position>,
    next_heartbeat_at: Duration,
}

/// Coarse role, for subsystems that only need to know whether this node may
/// own live sockets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RoleKind {
    Follower,
    Candidate,
    Leader,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CurrentLeader {
    Me,
    Other(NodeId),
    Unknown,
}

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("not the leader; redirect to node {0:?}")]
    LeaderRedirect(NodeId),

    #[error("no leader currently known")]
    NoLeader,

    #[error("local i/o failure: {0}")]
    LocalIoError(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    Peer(NodeId),
    Broadcast,
}

/// A typed message queued for the wire. The driver encodes and sends these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outbound {
    RequestVote(RequestVote),
    ReplyVote(ReplyVote),
    ConsensusHeartbeat(ConsensusHeartbeat),
    MessageAcknowledgement(MessageAcknowledgement),
    Resend { fields: Resend, body: Bytes },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutboundFrame {
    pub destination: Destination,
    pub message: Outbound,
}

/// Everything needed to construct a node. The store, clock, and rng are
/// injected so tests can drive the node deterministically.
pub struct NodeConfig<S: LogStore, C: Clock, R: Rng> {
    pub logger: slog::Logger,
    pub cluster_info: ClusterInfo,
    /// Term to resume from, normally recovered from persistent state.
    pub initial_term: Term,
    pub store: S,
    pub clock: C,
    pub rng: R,
    pub options: ClusterOptions,
}

impl<S: LogStore, C: Clock, R: Rng> ClusterNode<S, C, R> {
    pub fn new(config: NodeConfig<S, C, R>) -> Result<(Self, CommitStream), OptionsError> {
        let options = ClusterOptionsValidated::try_from(config.options)?;
        if !config.cluster_info.contains(config.cluster_info.my_node_id) {
            return Err(OptionsError::invalid("Cluster members must include the local node id"));
        }

        let (commit_publisher, commit_stream) = create_commit_stream();
        let my_id = config.cluster_info.my_node_id;
        let peer_ids = config.cluster_info.peer_ids();

        let mut node = ClusterNode {
            logger: config.logger,
            my_id,
            cluster_info: config.cluster_info,
            peer_ids,
            term: config.initial_term,
            voted_for_this_term: None,
            role: Role::Follower(FollowerState {
                leader: None,
                election_deadline: Duration::from_secs(0),
            }),
            log: ReplicatedLog::new(config.store, options.durable_ack_writes),
            clock: config.clock,
            rng: config.rng,
            heartbeat_interval: options.heartbeat_interval,
            election_timeout: RangeInclusive::new(options.election_min_timeout, options.election_max_timeout),
            max_inbound_batch: options.max_inbound_batch,
            commit_publisher,
            outbox: Vec::new(),
        };
        node.transition_to_follower(None);

        Ok((node, commit_stream))
    }

    pub fn current_role(&self) -> RoleKind {
        match &self.role {
            Role::Follower(_) => RoleKind::Follower,
            Role::Candidate(_) => RoleKind::Candidate,
            Role::Leader(_) => RoleKind::Leader,
        }
    }

    pub fn current_leader(&self) -> CurrentLeader {
        match &self.role {
            Role::Leader(_) => CurrentLeader::Me,
            Role::Candidate(_) => CurrentLeader::Unknown,
            Role::Follower(FollowerState { leader: None, .. }) => CurrentLeader::Unknown,
            Role::Follower(FollowerState {
                leader: Some((leader_id, _)),
                ..
            }) => CurrentLeader::Other(*leader_id),
        }
    }

    pub fn current_term(&self) -> Term {
        self.term
    }

    pub fn end_position(&self) -> Position {
        self.log.end_position()
    }

    pub fn committed_position(&self) -> Position {
        self.log.committed_position()
    }

    /// Raw log bytes from `start` to the current end. The session layer
    /// reads committed entries through this after a commit notification.
    pub fn read_from(&self, start: Position) -> Result<Bytes, io::Error> {
        self.log.read_from(start)
    }

    pub(crate) fn max_inbound_batch(&self) -> usize {
        self.max_inbound_batch
    }

    pub fn drain_outbox(&mut self) -> Vec<OutboundFrame> {
        std::mem::take(&mut self.outbox)
    }

    /// Leader-only append of an opaque gateway event. Replication to peers is
    /// asynchronous; commit advancement arrives later via the commit stream.
    pub fn append(&mut self, data: &[u8]) -> Result<Position, AppendError> {
        match self.current_leader() {
            CurrentLeader::Me => {}
            CurrentLeader::Other(leader_id) => return Err(AppendError::LeaderRedirect(leader_id)),
            CurrentLeader::Unknown => return Err(AppendError::NoLeader),
        }

        let new_end = self.log.append(data)?;

        // Pull the next heartbeat forward so the new log end reaches peers
        // without waiting out the full interval.
        let now = self.clock.now();
        if let Role::Leader(ls) = &mut self.role {
            ls.next_heartbeat_at = now;
        }

        Ok(new_end)
    }

    /// Advance election/heartbeat timers based on monotonic elapsed time. At
    /// most one transition per timer class per call.
    pub fn poll_timers(&mut self) {
        let now = self.clock.now();

        let election_due = match &self.role {
            Role::Follower(fs) => now >= fs.election_deadline,
            Role::Candidate(cs) => now >= cs.election_deadline,
            Role::Leader(_) => false,
        };
        if election_due {
            self.start_election();
        }

        let heartbeat_due = matches!(&self.role, Role::Leader(ls) if now >= ls.next_heartbeat_at);
        if heartbeat_due {
            self.broadcast_heartbeat(now);
        }
    }

    fn majority(&self) -> usize {
        (self.cluster_info.members.len() / 2) + 1
    }

    fn random_election_deadline(&mut self) -> Duration {
        self.clock.now() + self.rng.gen_range(self.election_timeout.clone())
    }

    fn transition_to_follower(&mut self, leader: Option<(NodeId, SessionId)>) {
        let election_deadline = self.random_election_deadline();
        self.role = Role::Follower(FollowerState {
            leader,
            election_deadline,
        });
    }

    /// Observed a term above ours: adopt it, clear the vote record, and
    /// revert to follower regardless of current role.
    fn adopt_term(&mut self, new_term: Term, leader: Option<(NodeId, SessionId)>) {
        slog::info!(
            self.logger,
            "Observed term {:?} above local term {:?}. Reverting to follower.",
            new_term,
            self.term
        );
        self.term = new_term;
        self.voted_for_this_term = None;
        self.transition_to_follower(leader);
    }

    fn start_election(&mut self) {
        self.term.incr();
        self.voted_for_this_term = Some(self.my_id);
        let session_id = SessionId::new(self.rng.gen());
        let election_deadline = self.random_election_deadline();

        let mut received_votes_from = HashSet::new();
        received_votes_from.insert(self.my_id);
        self.role = Role::Candidate(CandidateState {
            session_id,
            received_votes_from,
            election_deadline,
        });

        slog::info!(
            self.logger,
            "Election timeout fired. Campaigning for term {:?} with session {:?}",
            self.term,
            session_id
        );

        self.outbox.push(OutboundFrame {
            destination: Destination::Broadcast,
            message: Outbound::RequestVote(RequestVote {
                candidate_id: self.my_id,
                candidate_session_id: session_id,
                term: self.term,
                last_acked_position: self.log.end_position(),
            }),
        });

        // Degenerate single-member cluster: own vote is already a majority.
        if 1 >= self.majority() {
            self.become_leader(session_id);
        }
    }

    fn become_leader(&mut self, session_id: SessionId) {
        let now = self.clock.now();
        let acked = self.peer_ids.iter().map(|id| (*id, Position::zero())).collect();
        self.role = Role::Leader(LeaderState {
            session_id,
            acked,
            next_heartbeat_at: now,
        });

        slog::info!(
            self.logger,
            "Won election for term {:?}. Leading with session {:?}",
            self.term,
            session_id
        );

        self.broadcast_heartbeat(now);
    }

    fn broadcast_heartbeat(&mut self, now: Duration) {
        let position = self.log.end_position();
        let session_id = match &mut self.role {
            Role::Leader(ls) => {
                ls.next_heartbeat_at = now + self.heartbeat_interval;
                ls.session_id
            }
            _ => return,
        };

        self.outbox.push(OutboundFrame {
            destination: Destination::Broadcast,
            message: Outbound::ConsensusHeartbeat(ConsensusHeartbeat {
                node_id: self.my_id,
                term: self.term,
                position,
                leader_session_id: session_id,
            }),
        });
    }

    fn send_resend(&mut self, to: NodeId, start: Position) {
        let body = match self.log.read_from(start) {
            Ok(body) => body,
            Err(io_error) => {
                slog::error!(
                    self.logger,
                    "Failed to read log from {:?} for resend to {:?}: {}",
                    start,
                    to,
                    io_error
                );
                return;
            }
        };

        let session_id = match &self.role {
            Role::Leader(ls) => ls.session_id,
            _ => return,
        };

        slog::info!(
            self.logger,
            "Resending {} log bytes from {:?} to {:?}",
            body.len(),
            start,
            to
        );

        self.outbox.push(OutboundFrame {
            destination: Destination::Peer(to),
            message: Outbound::Resend {
                fields: Resend {
                    leader_session_id: session_id,
                    term: self.term,
                    start_position: start,
                },
                body,
            },
        });
    }

    fn ratchet_commit_and_publish(&mut self, tentative: Position) {
        if self.log.ratchet_commit(tentative) {
            let committed = self.log.committed_position();
            slog::debug!(self.logger, "Commit position advanced to {:?}", committed);
            self.commit_publisher.notify_commit_advanced(&self.logger, committed);
        }
    }
}

/// The position acknowledged by at least `majority` of the cluster, given
/// one entry per member (the leader's own log end included).
fn majority_acked_position(mut positions: Vec<Position>, majority: usize) -> Position {
    positions.sort();
    positions[positions.len() - majority]
}

impl<S: LogStore, C: Clock, R: Rng> RaftHandler for ClusterNode<S, C, R> {
    fn on_request_vote(
        &mut self,
        candidate_id: NodeId,
        candidate_session_id: SessionId,
        term: Term,
        last_acked_position: Position,
    ) {
        if candidate_id == self.my_id {
            return;
        }
        if !self.cluster_info.contains(candidate_id) {
            slog::warn!(self.logger, "RequestVote from non-member {:?}. Ignoring.", candidate_id);
            return;
        }

        if term < self.term {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}: candidate term {:?} is out of date.",
                candidate_id,
                term
            );
            self.outbox.push(OutboundFrame {
                destination: Destination::Peer(candidate_id),
                message: Outbound::ReplyVote(ReplyVote {
                    sender_node_id: self.my_id,
                    candidate_id,
                    term: self.term,
                    vote: Vote::Denied,
                }),
            });
            return;
        }

        if term > self.term {
            self.adopt_term(term, None);
        }

        // At most one vote per term; an incumbent vote (including our own
        // vote for ourselves as candidate) never flips within a term.
        let already_voted_for_other = matches!(self.voted_for_this_term, Some(voted) if voted != candidate_id);
        let candidate_log_current = last_acked_position >= self.log.end_position();

        let vote = if already_voted_for_other {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}: already voted for {:?} this term.",
                candidate_id,
                self.voted_for_this_term
            );
            Vote::Denied
        } else if !candidate_log_current {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}: candidate log {:?} is behind ours {:?}.",
                candidate_id,
                last_acked_position,
                self.log.end_position()
            );
            Vote::Denied
        } else {
            slog::info!(
                self.logger,
                "Voting for {:?} (session {:?}) in term {:?}.",
                candidate_id,
                candidate_session_id,
                self.term
            );
            self.voted_for_this_term = Some(candidate_id);
            let election_deadline = self.random_election_deadline();
            if let Role::Follower(fs) = &mut self.role {
                fs.election_deadline = election_deadline;
            }
            Vote::Granted
        };

        self.outbox.push(OutboundFrame {
            destination: Destination::Peer(candidate_id),
            message: Outbound::ReplyVote(ReplyVote {
                sender_node_id: self.my_id,
                candidate_id,
                term: self.term,
                vote,
            }),
        });
    }

    fn on_reply_vote(&mut self, sender_node_id: NodeId, candidate_id: NodeId, term: Term, vote: Vote) {
        if !self.cluster_info.contains(sender_node_id) {
            slog::warn!(self.logger, "Vote reply from non-member {:?}. Ignoring.", sender_node_id);
            return;
        }
        if term > self.term {
            self.adopt_term(term, None);
            return;
        }
        if candidate_id != self.my_id || term != self.term {
            slog::debug!(self.logger, "Ignoring vote reply for stale election (term {:?}).", term);
            return;
        }

        let (session_id, votes_received) = match &mut self.role {
            Role::Candidate(cs) => match vote {
                Vote::Granted => {
                    cs.received_votes_from.insert(sender_node_id);
                    (cs.session_id, cs.received_votes_from.len())
                }
                Vote::Denied => {
                    slog::info!(self.logger, "Vote denied by {:?} for term {:?}.", sender_node_id, term);
                    return;
                }
            },
            _ => {
                slog::debug!(self.logger, "Vote reply received while not campaigning. Ignoring.");
                return;
            }
        };

        slog::info!(
            self.logger,
            "Received {}/{} votes for term {:?}",
            votes_received,
            self.cluster_info.members.len(),
            term
        );

        if votes_received >= self.majority() {
            self.become_leader(session_id);
        }
    }

    fn on_consensus_heartbeat(&mut self, node_id: NodeId, term: Term, position: Position, leader_session_id: SessionId) {
        if node_id == self.my_id {
            return;
        }
        if !self.cluster_info.contains(node_id) {
            slog::warn!(self.logger, "Heartbeat from non-member {:?}. Ignoring.", node_id);
            return;
        }
        if term < self.term {
            slog::debug!(
                self.logger,
                "Ignoring heartbeat from {:?} for stale term {:?}.",
                node_id,
                term
            );
            return;
        }

        let newly_recognized = if term > self.term {
            self.adopt_term(term, Some((node_id, leader_session_id)));
            true
        } else {
            match &self.role {
                Role::Leader(_) => {
                    slog::error!(
                        self.logger,
                        "Heartbeat from {:?} claims leadership of our own term {:?}. Ignoring.",
                        node_id,
                        term
                    );
                    return;
                }
                Role::Candidate(_) => {
                    slog::info!(
                        self.logger,
                        "Heartbeat from {:?} for term {:?}: election already won elsewhere. Standing down.",
                        node_id,
                        term
                    );
                    self.transition_to_follower(Some((node_id, leader_session_id)));
                    true
                }
                Role::Follower(fs) => match fs.leader {
                    Some((leader_id, session_id)) => {
                        if leader_id != node_id || session_id != leader_session_id {
                            // Reordered traffic from an earlier leadership
                            // run. The session id is authoritative.
                            slog::warn!(
                                self.logger,
                                "Rejecting heartbeat from {:?} session {:?}: recognized leader is {:?} session {:?}.",
                                node_id,
                                leader_session_id,
                                leader_id,
                                session_id
                            );
                            return;
                        }
                        false
                    }
                    None => {
                        slog::info!(
                            self.logger,
                            "Recognized {:?} (session {:?}) as leader for term {:?}.",
                            node_id,
                            leader_session_id,
                            term
                        );
                        true
                    }
                },
            }
        };
        if let Role::Follower(fs) = &mut self.role {
            fs.leader = Some((node_id, leader_session_id));
        }

        // First heartbeat of a new leadership run: local bytes beyond the
        // new leader's end are uncommitted leftovers of a deposed run and
        // must not survive into acknowledgements. The vote rule guarantees
        // the new leader's end covers every committed position, so the
        // truncation never touches committed bytes. Only the session
        // handover triggers this; a reordered older heartbeat within the
        // same session must not shrink the log.
        if newly_recognized && self.log.end_position() > position {
            slog::info!(
                self.logger,
                "Truncating divergent suffix: local end {:?} exceeds new leader's end {:?}.",
                self.log.end_position(),
                position
            );
            if let Err(io_error) = self.log.truncate_to(position) {
                slog::error!(self.logger, "Failed to truncate divergent log suffix: {}", io_error);
                self.outbox.push(OutboundFrame {
                    destination: Destination::Peer(node_id),
                    message: Outbound::MessageAcknowledgement(MessageAcknowledgement {
                        new_acked_position: self.log.end_position(),
                        node_id: self.my_id,
                        status: AckStatus::Error,
                    }),
                });
                return;
            }
        }

        let election_deadline = self.random_election_deadline();
        if let Role::Follower(fs) = &mut self.role {
            fs.election_deadline = election_deadline;
        }

        let end = self.log.end_position();
        let status = if end < position {
            slog::info!(
                self.logger,
                "Gap detected: leader asserts {:?} but local log ends at {:?}.",
                position,
                end
            );
            AckStatus::MissingLogEntries
        } else {
            AckStatus::Ok
        };

        self.outbox.push(OutboundFrame {
            destination: Destination::Peer(node_id),
            message: Outbound::MessageAcknowledgement(MessageAcknowledgement {
                new_acked_position: end,
                node_id: self.my_id,
                status,
            }),
        });
    }

    fn on_message_acknowledgement(&mut self, new_acked_position: Position, node_id: NodeId, status: AckStatus) {
        if node_id == self.my_id {
            return;
        }

        let end = self.log.end_position();
        let majority = self.majority();

        let (tentative_commit, resend_from) = match &mut self.role {
            Role::Leader(ls) => {
                let acked = match ls.acked.get_mut(&node_id) {
                    Some(acked) => acked,
                    None => {
                        slog::warn!(self.logger, "Acknowledgement from unknown node {:?}. Ignoring.", node_id);
                        return;
                    }
                };
                *acked = cmp::max(*acked, new_acked_position);
                let acked = *acked;

                let mut positions: Vec<Position> = ls.acked.values().copied().collect();
                positions.push(end);
                let tentative_commit = majority_acked_position(positions, majority);

                let resend_from = match status {
                    AckStatus::Ok => None,
                    AckStatus::MissingLogEntries => Some(acked),
                    AckStatus::Error => {
                        slog::warn!(self.logger, "Node {:?} reported an acknowledgement error.", node_id);
                        None
                    }
                };

                (tentative_commit, resend_from)
            }
            _ => {
                slog::debug!(self.logger, "Acknowledgement received while not leader. Ignoring.");
                return;
            }
        };

        self.ratchet_commit_and_publish(tentative_commit);

        if let Some(start) = resend_from {
            self.send_resend(node_id, start);
        }
    }

    fn on_resend(&mut self, leader_session_id: SessionId, term: Term, start_position: Position, body: &[u8]) {
        if term < self.term {
            slog::debug!(self.logger, "Ignoring resend for stale term {:?}.", term);
            return;
        }
        if term > self.term {
            // Can't validate the session against a leader we haven't
            // recognized yet; adopt the term and let its heartbeat establish
            // leadership before accepting log bytes.
            self.adopt_term(term, None);
            return;
        }

        let leader_id = match &self.role {
            Role::Follower(FollowerState {
                leader: Some((leader_id, session_id)),
                ..
            }) if *session_id == leader_session_id => *leader_id,
            _ => {
                slog::warn!(
                    self.logger,
                    "Rejecting resend from unrecognized leader session {:?} for term {:?}.",
                    leader_session_id,
                    term
                );
                return;
            }
        };

        if start_position > self.log.end_position() {
            slog::warn!(
                self.logger,
                "Resend starts at {:?} beyond local log end {:?}; awaiting retargeted resend.",
                start_position,
                self.log.end_position()
            );
            return;
        }

        match self.log.append_from(start_position, body) {
            Ok(new_end) => {
                slog::info!(
                    self.logger,
                    "Applied {} resent bytes from {:?}; log end now {:?}.",
                    body.len(),
                    start_position,
                    new_end
                );
                self.outbox.push(OutboundFrame {
                    destination: Destination::Peer(leader_id),
                    message: Outbound::MessageAcknowledgement(MessageAcknowledgement {
                        new_acked_position: new_end,
                        node_id: self.my_id,
                        status: AckStatus::Ok,
                    }),
                });
            }
            Err(io_error) => {
                slog::error!(self.logger, "Failed to apply resent log bytes: {}", io_error);
                self.outbox.push(OutboundFrame {
                    destination: Destination::Peer(leader_id),
                    message: Outbound::MessageAcknowledgement(MessageAcknowledgement {
                        new_acked_position: self.log.end_position(),
                        node_id: self.my_id,
                        status: AckStatus::Error,
                    }),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemberInfo;
    use crate::cluster::clock::ManualClock;
    use crate::commitlog::InMemoryLogStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::net::Ipv4Addr;

    const HEARTBEAT_MS: u64 = 100;
    const ELECTION_MIN_MS: u64 = 500;
    const ELECTION_MAX_MS: u64 = 1000;

    type TestNode = ClusterNode<InMemoryLogStore, ManualClock, StdRng>;

    fn id(n: u16) -> NodeId {
        NodeId::new(n)
    }

    fn cluster_info(my_id: u16, member_ids: &[u16]) -> ClusterInfo {
        ClusterInfo {
            my_node_id: id(my_id),
            members: member_ids
                .iter()
                .map(|n| MemberInfo {
                    node_id: id(*n),
                    ip: Ipv4Addr::LOCALHOST,
                    port: 9000 + n,
                })
                .collect(),
        }
    }

    fn test_node(my_id: u16, member_ids: &[u16]) -> (TestNode, ManualClock, CommitStream) {
        test_node_with_store(my_id, member_ids, InMemoryLogStore::new())
    }

    fn test_node_with_store(
        my_id: u16,
        member_ids: &[u16],
        store: InMemoryLogStore,
    ) -> (TestNode, ManualClock, CommitStream) {
        let clock = ManualClock::new();
        let config = NodeConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            cluster_info: cluster_info(my_id, member_ids),
            initial_term: Term::new(0),
            store,
            clock: clock.clone(),
            rng: StdRng::seed_from_u64(u64::from(my_id)),
            options: ClusterOptions {
                heartbeat_interval: Some(Duration::from_millis(HEARTBEAT_MS)),
                election_min_timeout: Some(Duration::from_millis(ELECTION_MIN_MS)),
                election_max_timeout: Some(Duration::from_millis(ELECTION_MAX_MS)),
                ..ClusterOptions::default()
            },
        };
        let (node, commit_stream) = ClusterNode::new(config).unwrap();
        (node, clock, commit_stream)
    }

    fn force_election_timeout(node: &mut TestNode, clock: &ManualClock) {
        clock.advance(Duration::from_millis(ELECTION_MAX_MS));
        node.poll_timers();
    }

    /// Drive the node to leadership of term 1 in a 3-member cluster.
    fn make_leader(node: &mut TestNode, clock: &ManualClock, granting_peer: u16) {
        force_election_timeout(node, clock);
        assert_eq!(RoleKind::Candidate, node.current_role());
        node.on_reply_vote(id(granting_peer), node.my_id, node.current_term(), Vote::Granted);
        assert_eq!(RoleKind::Leader, node.current_role());
        node.drain_outbox();
    }

    fn candidate_session(node: &TestNode) -> SessionId {
        match &node.role {
            Role::Candidate(cs) => cs.session_id,
            _ => panic!("not a candidate"),
        }
    }

    #[test]
    fn follower_campaigns_on_election_timeout() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        assert_eq!(RoleKind::Follower, node.current_role());

        force_election_timeout(&mut node, &clock);

        assert_eq!(RoleKind::Candidate, node.current_role());
        assert_eq!(Term::new(1), node.current_term());

        let outbox = node.drain_outbox();
        assert_eq!(1, outbox.len());
        assert_eq!(Destination::Broadcast, outbox[0].destination);
        match &outbox[0].message {
            Outbound::RequestVote(rv) => {
                assert_eq!(id(1), rv.candidate_id);
                assert_eq!(Term::new(1), rv.term);
                assert_eq!(Position::zero(), rv.last_acked_position);
            }
            other => panic!("expected RequestVote, got {:?}", other),
        }
    }

    #[test]
    fn repeated_timeout_restarts_election_with_higher_term() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);

        force_election_timeout(&mut node, &clock);
        assert_eq!(Term::new(1), node.current_term());

        // Split vote: no replies arrive. Next timeout increments the term.
        force_election_timeout(&mut node, &clock);
        assert_eq!(RoleKind::Candidate, node.current_role());
        assert_eq!(Term::new(2), node.current_term());
    }

    #[test]
    fn grants_vote_to_current_candidate() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_request_vote(id(2), SessionId::new(7), Term::new(1), Position::zero());

        assert_eq!(Term::new(1), node.current_term());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ReplyVote(rv) => {
                assert_eq!(Vote::Granted, rv.vote);
                assert_eq!(id(2), rv.candidate_id);
                assert_eq!(Term::new(1), rv.term);
            }
            other => panic!("expected ReplyVote, got {:?}", other),
        }
    }

    #[test]
    fn never_votes_twice_in_one_term() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_request_vote(id(2), SessionId::new(7), Term::new(1), Position::zero());
        node.drain_outbox();

        // A different candidate in the same term is denied.
        node.on_request_vote(id(3), SessionId::new(8), Term::new(1), Position::zero());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ReplyVote(rv) => assert_eq!(Vote::Denied, rv.vote),
            other => panic!("expected ReplyVote, got {:?}", other),
        }

        // The incumbent candidate is re-granted (idempotent retry).
        node.on_request_vote(id(2), SessionId::new(7), Term::new(1), Position::zero());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ReplyVote(rv) => assert_eq!(Vote::Granted, rv.vote),
            other => panic!("expected ReplyVote, got {:?}", other),
        }
    }

    #[test]
    fn denies_stale_term_candidate() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock); // local term is now 1
        node.drain_outbox();

        node.on_request_vote(id(2), SessionId::new(7), Term::new(0), Position::zero());

        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ReplyVote(rv) => {
                assert_eq!(Vote::Denied, rv.vote);
                assert_eq!(Term::new(1), rv.term);
            }
            other => panic!("expected ReplyVote, got {:?}", other),
        }
    }

    #[test]
    fn denies_candidate_with_shorter_log() {
        let mut store = InMemoryLogStore::new();
        store.persist(Position::zero(), b"some replicated bytes").unwrap();
        let (mut node, _clock, _commits) = test_node_with_store(1, &[1, 2, 3], store);

        node.on_request_vote(id(2), SessionId::new(7), Term::new(1), Position::new(5));

        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ReplyVote(rv) => assert_eq!(Vote::Denied, rv.vote),
            other => panic!("expected ReplyVote, got {:?}", other),
        }
    }

    #[test]
    fn candidate_wins_with_majority_and_heartbeats_immediately() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock);
        let term = node.current_term();
        node.drain_outbox();

        // First granted reply (plus own vote) reaches majority of 3.
        node.on_reply_vote(id(2), id(1), term, Vote::Granted);

        assert_eq!(RoleKind::Leader, node.current_role());
        assert_eq!(CurrentLeader::Me, node.current_leader());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ConsensusHeartbeat(hb) => {
                assert_eq!(id(1), hb.node_id);
                assert_eq!(term, hb.term);
                assert_eq!(Position::zero(), hb.position);
            }
            other => panic!("expected ConsensusHeartbeat, got {:?}", other),
        }
    }

    #[test]
    fn denied_votes_do_not_elect() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock);
        let term = node.current_term();

        node.on_reply_vote(id(2), id(1), term, Vote::Denied);
        node.on_reply_vote(id(3), id(1), term, Vote::Denied);

        assert_eq!(RoleKind::Candidate, node.current_role());
    }

    #[test]
    fn candidate_stands_down_on_heartbeat_for_same_term() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock);
        let term = node.current_term();
        node.drain_outbox();

        node.on_consensus_heartbeat(id(2), term, Position::zero(), SessionId::new(9));

        assert_eq!(RoleKind::Follower, node.current_role());
        assert_eq!(CurrentLeader::Other(id(2)), node.current_leader());
    }

    #[test]
    fn leader_steps_down_on_newer_term() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        make_leader(&mut node, &clock, 2);

        node.on_reply_vote(id(3), id(2), Term::new(5), Vote::Granted);

        assert_eq!(RoleKind::Follower, node.current_role());
        assert_eq!(Term::new(5), node.current_term());
    }

    #[test]
    fn heartbeat_acknowledged_with_log_end() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_consensus_heartbeat(id(2), Term::new(1), Position::zero(), SessionId::new(9));

        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::MessageAcknowledgement(ack) => {
                assert_eq!(Position::zero(), ack.new_acked_position);
                assert_eq!(id(1), ack.node_id);
                assert_eq!(AckStatus::Ok, ack.status);
            }
            other => panic!("expected MessageAcknowledgement, got {:?}", other),
        }
        assert_eq!(Destination::Peer(id(2)), outbox[0].destination);
    }

    #[test]
    fn heartbeat_beyond_log_end_reports_gap() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(5), SessionId::new(9));

        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::MessageAcknowledgement(ack) => {
                assert_eq!(Position::zero(), ack.new_acked_position);
                assert_eq!(AckStatus::MissingLogEntries, ack.status);
            }
            other => panic!("expected MessageAcknowledgement, got {:?}", other),
        }
    }

    #[test]
    fn heartbeat_from_stale_session_rejected() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_consensus_heartbeat(id(2), Term::new(1), Position::zero(), SessionId::new(9));
        node.drain_outbox();

        // Same term, different session: reordered traffic from an earlier
        // run of node 2. No ack may be sent.
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::zero(), SessionId::new(3));

        assert!(node.drain_outbox().is_empty());
    }

    #[test]
    fn deposed_leader_discards_uncommitted_suffix() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        make_leader(&mut node, &clock, 2);

        node.append(b"base!").unwrap();
        node.on_message_acknowledgement(Position::new(5), id(2), AckStatus::Ok);
        assert_eq!(Position::new(5), node.committed_position());

        // Appended while effectively partitioned: replicated to no one.
        node.append(b"XX").unwrap();
        assert_eq!(Position::new(7), node.end_position());
        node.drain_outbox();

        // A new leader emerges at a higher term; its log ends at the
        // committed prefix. The divergent local suffix must not survive.
        node.on_consensus_heartbeat(id(2), Term::new(2), Position::new(5), SessionId::new(11));

        assert_eq!(RoleKind::Follower, node.current_role());
        assert_eq!(Position::new(5), node.end_position());
        assert_eq!(Position::new(5), node.committed_position());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::MessageAcknowledgement(ack) => {
                assert_eq!(Position::new(5), ack.new_acked_position);
                assert_eq!(AckStatus::Ok, ack.status);
            }
            other => panic!("expected MessageAcknowledgement, got {:?}", other),
        }

        // The new leader appends its own bytes; normal gap detection and
        // resend refill from the shared committed prefix.
        node.on_consensus_heartbeat(id(2), Term::new(2), Position::new(7), SessionId::new(11));
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::MessageAcknowledgement(ack) => {
                assert_eq!(Position::new(5), ack.new_acked_position);
                assert_eq!(AckStatus::MissingLogEntries, ack.status);
            }
            other => panic!("expected MessageAcknowledgement, got {:?}", other),
        }
        node.on_resend(SessionId::new(11), Term::new(2), Position::new(5), b"YY");

        assert_eq!(Position::new(7), node.end_position());
        assert_eq!(&b"base!YY"[..], &node.read_from(Position::zero()).unwrap()[..]);
    }

    #[test]
    fn reordered_heartbeat_within_session_does_not_shrink_log() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);
        let session = SessionId::new(9);
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(3), session);
        node.on_resend(session, Term::new(1), Position::zero(), b"abc");
        node.drain_outbox();

        // A delayed heartbeat from the same session asserting an older end.
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(1), session);

        assert_eq!(Position::new(3), node.end_position());
    }

    #[test]
    fn vote_reply_from_non_member_ignored() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock);
        let term = node.current_term();

        // A granted reply from outside the configured member set must not
        // count toward majority.
        node.on_reply_vote(id(9), id(1), term, Vote::Granted);

        assert_eq!(RoleKind::Candidate, node.current_role());
    }

    #[test]
    fn heartbeat_from_non_member_ignored() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        node.on_consensus_heartbeat(id(9), Term::new(1), Position::zero(), SessionId::new(9));

        assert_eq!(Term::new(0), node.current_term());
        assert_eq!(CurrentLeader::Unknown, node.current_leader());
        assert!(node.drain_outbox().is_empty());
    }

    #[test]
    fn resend_appends_and_acknowledges() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);
        let session = SessionId::new(9);
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(3), session);
        node.drain_outbox();

        node.on_resend(session, Term::new(1), Position::zero(), b"abc");

        assert_eq!(Position::new(3), node.end_position());
        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::MessageAcknowledgement(ack) => {
                assert_eq!(Position::new(3), ack.new_acked_position);
                assert_eq!(AckStatus::Ok, ack.status);
            }
            other => panic!("expected MessageAcknowledgement, got {:?}", other),
        }
    }

    #[test]
    fn resend_from_unrecognized_session_ignored() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(3), SessionId::new(9));
        node.drain_outbox();

        node.on_resend(SessionId::new(4), Term::new(1), Position::zero(), b"abc");

        assert_eq!(Position::zero(), node.end_position());
        assert!(node.drain_outbox().is_empty());
    }

    #[test]
    fn resend_truncates_divergent_suffix() {
        let mut store = InMemoryLogStore::new();
        store.persist(Position::zero(), b"abXX").unwrap();
        let (mut node, _clock, _commits) = test_node_with_store(1, &[1, 2, 3], store);
        let session = SessionId::new(9);
        node.on_consensus_heartbeat(id(2), Term::new(1), Position::new(5), session);
        node.drain_outbox();

        node.on_resend(session, Term::new(1), Position::new(2), b"cde");

        assert_eq!(Position::new(5), node.end_position());
        assert_eq!(&b"abcde"[..], &node.log.read_from(Position::zero()).unwrap()[..]);
    }

    #[test]
    fn leader_advances_commit_on_majority_ack() {
        let (mut node, clock, mut commits) = test_node(1, &[1, 2, 3]);
        make_leader(&mut node, &clock, 2);

        let end = node.append(b"trade").unwrap();
        assert_eq!(Position::new(5), end);
        assert_eq!(Position::zero(), node.committed_position());

        // One peer ack + leader's own log = majority of 3.
        node.on_message_acknowledgement(Position::new(5), id(2), AckStatus::Ok);

        assert_eq!(Position::new(5), node.committed_position());
        assert_eq!(Some(Position::new(5)), commits.try_next());
    }

    #[test]
    fn commit_requires_majority_not_single_ack() {
        let (mut node, clock, mut commits) = test_node(1, &[1, 2, 3, 4, 5]);
        force_election_timeout(&mut node, &clock);
        let term = node.current_term();
        node.on_reply_vote(id(2), id(1), term, Vote::Granted);
        node.on_reply_vote(id(3), id(1), term, Vote::Granted);
        assert_eq!(RoleKind::Leader, node.current_role());
        node.drain_outbox();

        node.append(b"trade").unwrap();
        node.on_message_acknowledgement(Position::new(5), id(2), AckStatus::Ok);

        // 2 of 5 (leader + one peer) is not a majority.
        assert_eq!(Position::zero(), node.committed_position());
        assert_eq!(None, commits.try_next());

        node.on_message_acknowledgement(Position::new(5), id(3), AckStatus::Ok);
        assert_eq!(Position::new(5), node.committed_position());
        assert_eq!(Some(Position::new(5)), commits.try_next());
    }

    #[test]
    fn gap_ack_triggers_targeted_resend() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        make_leader(&mut node, &clock, 2);
        node.append(b"abcde").unwrap();
        node.drain_outbox();

        node.on_message_acknowledgement(Position::new(2), id(3), AckStatus::MissingLogEntries);

        let outbox = node.drain_outbox();
        let resend = outbox
            .iter()
            .find_map(|frame| match &frame.message {
                Outbound::Resend { fields, body } => Some((frame.destination, fields.clone(), body.clone())),
                _ => None,
            })
            .expect("expected a Resend frame");
        assert_eq!(Destination::Peer(id(3)), resend.0);
        assert_eq!(Position::new(2), resend.1.start_position);
        assert_eq!(&b"cde"[..], &resend.2[..]);
    }

    #[test]
    fn acks_never_regress_peer_state() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        make_leader(&mut node, &clock, 2);
        node.append(b"abcde").unwrap();

        node.on_message_acknowledgement(Position::new(5), id(2), AckStatus::Ok);
        // A delayed, older ack must not pull the peer's state backwards.
        node.on_message_acknowledgement(Position::new(2), id(2), AckStatus::Ok);

        assert_eq!(Position::new(5), node.committed_position());
    }

    #[test]
    fn append_rejected_unless_leader() {
        let (mut node, _clock, _commits) = test_node(1, &[1, 2, 3]);

        match node.append(b"x") {
            Err(AppendError::NoLeader) => {}
            other => panic!("expected NoLeader, got {:?}", other.map(|_| ())),
        }

        node.on_consensus_heartbeat(id(2), Term::new(1), Position::zero(), SessionId::new(9));
        match node.append(b"x") {
            Err(AppendError::LeaderRedirect(leader)) => assert_eq!(id(2), leader),
            other => panic!("expected LeaderRedirect, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn single_member_cluster_elects_itself() {
        let (mut node, clock, _commits) = test_node(1, &[1]);

        force_election_timeout(&mut node, &clock);

        assert_eq!(RoleKind::Leader, node.current_role());
    }

    #[test]
    fn candidate_session_is_carried_into_leadership() {
        let (mut node, clock, _commits) = test_node(1, &[1, 2, 3]);
        force_election_timeout(&mut node, &clock);
        let session = candidate_session(&node);
        node.drain_outbox();

        node.on_reply_vote(id(2), id(1), node.current_term(), Vote::Granted);

        let outbox = node.drain_outbox();
        match &outbox[0].message {
            Outbound::ConsensusHeartbeat(hb) => assert_eq!(session, hb.leader_session_id),
            other => panic!("expected ConsensusHeartbeat, got {:?}", other),
        }
    }

    #[test]
    fn majority_acked_position_math() {
        fn run(expected: u64, acked: Vec<u64>) {
            let majority = (acked.len() / 2) + 1;
            let positions = acked.into_iter().map(Position::new).collect();
            assert_eq!(Position::new(expected), majority_acked_position(positions, majority));
        }

        // 3-cluster (leader's own end included in the inputs).
        run(0, vec![0, 0, 9]);
        run(8, vec![0, 8, 9]);
        run(8, vec![8, 8, 9]);
        run(9, vec![9, 9, 9]);

        // 5-cluster
        run(0, vec![0, 0, 0, 8, 9]);
        run(7, vec![0, 0, 7, 8, 9]);
        run(7, vec![5, 6, 7, 8, 9]);

        // Ordering doesn't matter.
        run(8, vec![9, 0, 8]);
        run(7, vec![9, 7, 0, 8, 0]);
    }
}
