use crate::cluster::NodeId;
use std::net::Ipv4Addr;

/// One configured cluster member. The address is consumed by the transport
/// collaborator; the replication core only routes by node id.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub node_id: NodeId,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Static cluster membership, known at configuration time.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    pub my_node_id: NodeId,
    pub members: Vec<MemberInfo>,
}

impl ClusterInfo {
    /// Every configured member except the local node.
    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .map(|m| m.node_id)
            .filter(|id| *id != self.my_node_id)
            .collect()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.members.iter().any(|m| m.node_id == node_id)
    }
}
