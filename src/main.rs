use fix_cluster::{
    ClusterDriver, ClusterInfo, ClusterNode, ClusterOptions, CommitStream, CurrentLeader, InProcessNetwork,
    InProcessTransport, MemberInfo, MonotonicClock, NodeConfig, NodeId, Position,
};
use rand::rngs::ThreadRng;
use slog::Drain;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

type DemoDriver = ClusterDriver<fix_cluster::InMemoryLogStore, MonotonicClock, ThreadRng, InProcessTransport>;

/// Three-member demo cluster over an in-process network: elect a leader,
/// replicate a few payloads, print commit positions as they land.
fn main() {
    let logger = root_logger();
    let cluster = demo_cluster_members();
    let network = InProcessNetwork::new();

    let mut drivers = Vec::new();
    let mut commit_streams = Vec::new();
    for member in &cluster {
        let (driver, commits) = demo_node(&logger, member.node_id, &cluster, &network);
        drivers.push(driver);
        commit_streams.push(commits);
    }

    let leader_index = loop {
        step(&mut drivers);
        if let Some(index) = drivers.iter().position(|d| d.current_leader() == CurrentLeader::Me) {
            break index;
        }
    };
    slog::info!(logger, "Node {:?} is the leader.", cluster[leader_index].node_id);

    for payload in [&b"8=FIX.4.4|35=D|"[..], &b"8=FIX.4.4|35=8|"[..], &b"8=FIX.4.4|35=F|"[..]].iter() {
        let position = drivers[leader_index].append(payload).unwrap();
        slog::info!(logger, "Appended {} bytes; log end {:?}.", payload.len(), position);
    }

    let target = drivers[leader_index].end_position();
    while drivers[leader_index].committed_position() < target {
        step(&mut drivers);
    }

    let mut last_commit = Position::zero();
    while let Some(position) = commit_streams[leader_index].try_next() {
        last_commit = position;
    }
    slog::info!(logger, "Cluster committed through {:?}.", last_commit);
}

fn step(drivers: &mut [DemoDriver]) {
    for driver in drivers.iter_mut() {
        driver.tick();
    }
    thread::sleep(Duration::from_millis(10));
}

fn demo_node(
    logger: &slog::Logger,
    node_id: NodeId,
    members: &[MemberInfo],
    network: &InProcessNetwork,
) -> (DemoDriver, CommitStream) {
    let node_logger = logger.new(slog::o!("node" => format!("{:?}", node_id)));
    let config = NodeConfig {
        logger: node_logger.clone(),
        cluster_info: ClusterInfo {
            my_node_id: node_id,
            members: members.to_vec(),
        },
        initial_term: fix_cluster::Term::new(0),
        store: fix_cluster::InMemoryLogStore::new(),
        clock: MonotonicClock::new(),
        rng: rand::thread_rng(),
        options: ClusterOptions::default(),
    };
    let (node, commits) = ClusterNode::new(config).unwrap();
    let driver = ClusterDriver::new(node_logger, node, network.join(node_id));
    (driver, commits)
}

fn demo_cluster_members() -> Vec<MemberInfo> {
    vec![
        MemberInfo {
            node_id: NodeId::new(1),
            ip: Ipv4Addr::LOCALHOST,
            port: 9001,
        },
        MemberInfo {
            node_id: NodeId::new(2),
            ip: Ipv4Addr::LOCALHOST,
            port: 9002,
        },
        MemberInfo {
            node_id: NodeId::new(3),
            ip: Ipv4Addr::LOCALHOST,
            port: 9003,
        },
    ]
}

fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}
