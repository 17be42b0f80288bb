use std::fmt;

/// NodeId identifies a cluster member. The member set is small and fixed,
/// known via configuration.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(u16);

impl NodeId {
    pub fn new(id: u16) -> Self {
        NodeId(id)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Term is the election epoch counter. Monotonically non-decreasing on every
/// node; any message carrying a greater term forces the receiver to adopt it.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SessionId disambiguates successive leadership runs. A candidate mints a
/// fresh one at each candidacy; it becomes the leader session id if the
/// candidate wins. Guards against delayed traffic from an earlier run of the
/// same node being replayed into a later one.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Outcome carried in a ReplyVote.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Vote {
    Granted,
    Denied,
}

/// Status carried in a MessageAcknowledgement.
///
/// `MissingLogEntries` is the gap-detected signal: the follower's log end is
/// behind the position asserted by the leader's heartbeat, and the leader
/// should resend from the follower's acked position rather than wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckStatus {
    Ok,
    MissingLogEntries,
    Error,
}
