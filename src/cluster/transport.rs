use crate::cluster::NodeId;
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use thiserror::Error;

/// Send/receive failure at the transport adapter. Recoverable: the consensus
/// engine tolerates total transport loss to any subset of peers indefinitely,
/// simply failing to make commit progress until connectivity returns.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0:?} is not reachable")]
    PeerUnreachable(NodeId),

    #[error("transport i/o failure: {0}")]
    Io(#[from] io::Error),
}

/// Transport adapter owned by an external collaborator (pub/sub streams in
/// the full gateway). All operations are non-blocking; `poll_inbound` may
/// deliver nothing.
pub trait Transport {
    fn send(&mut self, node_id: NodeId, frame: &[u8]) -> Result<(), TransportError>;

    fn broadcast(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next inbound frame with its sender, if one is queued.
    fn poll_inbound(&mut self) -> Option<(Bytes, NodeId)>;
}

/// Single-process message fabric connecting several InProcessTransport
/// endpoints. Links can be severed and healed to model partitions; frames
/// sent across a severed link are silently dropped, like packets on a dead
/// wire.
#[derive(Clone)]
pub struct InProcessNetwork {
    inner: Rc<RefCell<NetworkInner>>,
}

struct NetworkInner {
    queues: HashMap<NodeId, VecDeque<(Bytes, NodeId)>>,
    severed: HashSet<(NodeId, NodeId)>,
}

impl InProcessNetwork {
    pub fn new() -> Self {
        InProcessNetwork {
            inner: Rc::new(RefCell::new(NetworkInner {
                queues: HashMap::new(),
                severed: HashSet::new(),
            })),
        }
    }

    pub fn join(&self, node_id: NodeId) -> InProcessTransport {
        self.inner.borrow_mut().queues.insert(node_id, VecDeque::new());
        InProcessTransport {
            network: self.inner.clone(),
            my_id: node_id,
        }
    }

    /// Sever both directions between `a` and `b`.
    pub fn partition(&self, a: NodeId, b: NodeId) {
        let mut inner = self.inner.borrow_mut();
        inner.severed.insert((a, b));
        inner.severed.insert((b, a));
    }

    pub fn heal(&self, a: NodeId, b: NodeId) {
        let mut inner = self.inner.borrow_mut();
        inner.severed.remove(&(a, b));
        inner.severed.remove(&(b, a));
    }

    /// Sever `node` from every other member.
    pub fn isolate(&self, node: NodeId) {
        let mut inner = self.inner.borrow_mut();
        let others: Vec<NodeId> = inner.queues.keys().copied().filter(|id| *id != node).collect();
        for other in others {
            inner.severed.insert((node, other));
            inner.severed.insert((other, node));
        }
    }

    pub fn heal_all(&self) {
        self.inner.borrow_mut().severed.clear();
    }
}

impl Default for InProcessNetwork {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InProcessTransport {
    network: Rc<RefCell<NetworkInner>>,
    my_id: NodeId,
}

impl InProcessTransport {
    fn deliver(inner: &mut NetworkInner, from: NodeId, to: NodeId, frame: &[u8]) {
        if inner.severed.contains(&(from, to)) {
            return;
        }
        if let Some(queue) = inner.queues.get_mut(&to) {
            queue.push_back((Bytes::copy_from_slice(frame), from));
        }
    }
}

impl Transport for InProcessTransport {
    fn send(&mut self, node_id: NodeId, frame: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.network.borrow_mut();
        if !inner.queues.contains_key(&node_id) {
            return Err(TransportError::PeerUnreachable(node_id));
        }
        Self::deliver(&mut inner, self.my_id, node_id, frame);
        Ok(())
    }

    fn broadcast(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.network.borrow_mut();
        let targets: Vec<NodeId> = inner.queues.keys().copied().filter(|id| *id != self.my_id).collect();
        for target in targets {
            Self::deliver(&mut inner, self.my_id, target, frame);
        }
        Ok(())
    }

    fn poll_inbound(&mut self) -> Option<(Bytes, NodeId)> {
        self.network.borrow_mut().queues.get_mut(&self.my_id)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u16) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn send_and_poll() {
        let network = InProcessNetwork::new();
        let mut a = network.join(id(1));
        let mut b = network.join(id(2));

        a.send(id(2), b"hello").unwrap();

        let (frame, from) = b.poll_inbound().unwrap();
        assert_eq!(&b"hello"[..], &frame[..]);
        assert_eq!(id(1), from);
        assert!(b.poll_inbound().is_none());
    }

    #[test]
    fn broadcast_excludes_sender() {
        let network = InProcessNetwork::new();
        let mut a = network.join(id(1));
        let mut b = network.join(id(2));
        let mut c = network.join(id(3));

        a.broadcast(b"hb").unwrap();

        assert!(b.poll_inbound().is_some());
        assert!(c.poll_inbound().is_some());
        assert!(a.poll_inbound().is_none());
    }

    #[test]
    fn severed_link_drops_silently() {
        let network = InProcessNetwork::new();
        let mut a = network.join(id(1));
        let mut b = network.join(id(2));

        network.partition(id(1), id(2));
        a.send(id(2), b"lost").unwrap();
        assert!(b.poll_inbound().is_none());

        network.heal(id(1), id(2));
        a.send(id(2), b"found").unwrap();
        assert!(b.poll_inbound().is_some());
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let network = InProcessNetwork::new();
        let mut a = network.join(id(1));

        match a.send(id(9), b"x").unwrap_err() {
            TransportError::PeerUnreachable(peer) => assert_eq!(id(9), peer),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
