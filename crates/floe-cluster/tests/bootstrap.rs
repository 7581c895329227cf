//! Bootstrap integration tests.
//!
//! Runs the full sequence against real loopback sockets, in static
//! (flatfile) mode and in multicast mode. Each test uses its own
//! `StartupGuard` so tests do not interfere through the process-wide one.

use std::collections::BTreeSet;
use std::net::{IpAddr, TcpListener, UdpSocket};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use floe_cluster::{
    BootError, Bootstrap, DiscoveryAgent, DiscoveryMode, HeartbeatRecord, LocalInterface,
    MembershipProtocol, MulticastConfig, Node, StartupGuard,
};
use floe_core::{BuildVersion, ClusterConfig, NodeIdentity};
use tokio::sync::watch;

fn free_port() -> u16 {
    for _ in 0..64 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        if port < u16::MAX && UdpSocket::bind(("127.0.0.1", port + 1)).is_ok() {
            return port;
        }
    }
    panic!("no free port pair");
}

fn write_flatfile(dir: &Path, entries: &[&str]) -> std::path::PathBuf {
    let path = dir.join("flatfile");
    std::fs::write(&path, entries.join("\n")).unwrap();
    path
}

fn static_config(dir: &Path, entries: &[&str]) -> ClusterConfig {
    ClusterConfig {
        name: "integration".to_string(),
        ip: Some("127.0.0.1".to_string()),
        port: free_port(),
        flatfile: Some(write_flatfile(dir, entries)),
        ice_root: Some(dir.join("ice").display().to_string()),
        ..ClusterConfig::default()
    }
}

struct ZeroProtocol;

impl MembershipProtocol for ZeroProtocol {
    fn heartbeat(&self, _: &mut HeartbeatRecord, _: &BTreeSet<NodeIdentity>) -> u64 {
        0
    }
}

// ── Happy path ─────────────────────────────────────────────────

#[test]
fn static_bootstrap_forms_singleton_cloud() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &["10.0.0.1:54321", "10.0.0.2:54321"]);
    let guard = StartupGuard::new();

    let node = Bootstrap::new(&config)
        .with_guard(&guard)
        .run()
        .unwrap()
        .expect("first bootstrap runs");

    let me = node.identity();
    assert_eq!(me.ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
    assert_eq!(me.base_port(), config.port);
    assert_eq!(me.control_port(), config.port + 1);
    assert_eq!(node.listener().local_addr().unwrap().port(), config.port);
    assert_eq!(node.control_socket().local_addr().unwrap().port(), config.port + 1);

    // Flatfile left self out: self is added, with the insertion recorded.
    let discovery = node.discovery();
    assert!(matches!(discovery.mode(), DiscoveryMode::Static { .. }));
    assert!(discovery.self_inserted());
    assert_eq!(discovery.members().len(), 3);
    assert!(discovery.members().contains(&me));

    // The starter cloud is exactly {self} with a non-zero hash.
    let cloud = node.cloud();
    assert_eq!(cloud.size(), 1);
    assert!(cloud.contains(&me));
    assert_ne!(cloud.cloud_hash(), 0);
    assert_eq!(node.heartbeat_record().cloud_hash, cloud.cloud_hash());
    assert_eq!(node.heartbeat_record().cloud_name, "integration");

    assert!(dir.path().join("ice").is_dir());
}

#[test]
fn flatfile_listing_self_is_kept_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let self_entry = format!("127.0.0.1:{port}");
    let config = ClusterConfig {
        port,
        ..static_config(dir.path(), &[self_entry.as_str(), "10.0.0.2:54321"])
    };
    let guard = StartupGuard::new();

    let node = Bootstrap::new(&config).with_guard(&guard).run().unwrap().unwrap();
    assert!(!node.discovery().self_inserted());
    assert_eq!(node.discovery().members().len(), 2);
}

#[test]
fn explicit_ip_ignores_network_spec() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig {
        network: Some("10.0.0.0/8".to_string()),
        ..static_config(dir.path(), &[])
    };
    let guard = StartupGuard::new();

    let node = Bootstrap::new(&config)
        .with_guard(&guard)
        .with_interfaces(vec![LocalInterface::new("eth0", "10.1.2.3".parse().unwrap())])
        .run()
        .unwrap()
        .unwrap();
    assert_eq!(node.identity().ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
}

#[test]
fn network_spec_selects_matching_interface() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig {
        ip: None,
        network: Some("192.168.0.0/16,127.0.0.0/8".to_string()),
        ..static_config(dir.path(), &[])
    };
    let guard = StartupGuard::new();

    let node = Bootstrap::new(&config)
        .with_guard(&guard)
        .with_interfaces(vec![
            LocalInterface::new("eth0", "10.9.9.9".parse().unwrap()),
            LocalInterface::new("lo", "127.0.0.1".parse().unwrap()),
        ])
        .run()
        .unwrap()
        .unwrap();
    assert_eq!(node.identity().ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
}

// ── Multicast discovery ────────────────────────────────────────

fn multicast_config(dir: &Path, name: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        ip: Some("127.0.0.1".to_string()),
        port: free_port(),
        ice_root: Some(dir.join(name).display().to_string()),
        ..ClusterConfig::default()
    }
}

fn boot(config: &ClusterConfig, multicast: Option<&MulticastConfig>) -> Arc<Node> {
    let guard = StartupGuard::new();
    let mut bootstrap = Bootstrap::new(config).with_guard(&guard);
    if let Some(multicast) = multicast {
        bootstrap = bootstrap.with_multicast(multicast.clone());
    }
    Arc::new(bootstrap.run().unwrap().unwrap())
}

fn group_of(node: &Node) -> MulticastConfig {
    match node.discovery().mode() {
        DiscoveryMode::Multicast(mc) => mc.clone(),
        other => panic!("expected multicast discovery, got {other}"),
    }
}

#[test]
fn no_flatfile_bootstraps_in_multicast_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = multicast_config(dir.path(), "multicast-singleton");
    let node = boot(&config, None);

    let group = group_of(&node);
    let derived = MulticastConfig::derive(
        "multicast-singleton",
        node.identity().ip(),
        group.interface.clone(),
    );
    assert_eq!(group, derived);
    assert!(group.group.is_multicast());
    assert!(group.port >= 49152);
    assert!(node.discovery().multicast_socket().is_some());
    assert!(!node.discovery().self_inserted());

    let cloud = node.cloud();
    assert_eq!(cloud.size(), 1);
    assert!(cloud.contains(&node.identity()));
    assert_ne!(cloud.cloud_hash(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clouds_sharing_a_group_stay_apart() {
    let dir = tempfile::tempdir().unwrap();

    // alpha-1 picks the group; alpha-2 and beta are pinned onto it.
    let alpha_1 = boot(&multicast_config(dir.path(), "alpha"), None);
    let group = group_of(&alpha_1);
    let alpha_2 = boot(&multicast_config(dir.path(), "alpha"), Some(&group));
    let beta = boot(&multicast_config(dir.path(), "beta"), Some(&group));
    assert_eq!(group_of(&beta), group);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agents: Vec<_> = [&alpha_1, &alpha_2, &beta]
        .into_iter()
        .map(|node| {
            let agent =
                DiscoveryAgent::new(Arc::clone(node)).with_interval(Duration::from_millis(50));
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { agent.run(shutdown).await })
        })
        .collect();

    let paired = |a: &Node, b: &Node| a.discovery().candidates().contains(&b.identity());
    for _ in 0..200 {
        if paired(&alpha_1, &alpha_2) && paired(&alpha_2, &alpha_1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(paired(&alpha_1, &alpha_2));
    assert!(paired(&alpha_2, &alpha_1));

    // Give beta a few more rounds of alpha traffic before checking.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(beta.discovery().candidates().is_empty());
    assert!(!paired(&alpha_1, &beta));
    assert!(!paired(&alpha_2, &beta));
    for node in [&alpha_1, &alpha_2, &beta] {
        assert_eq!(node.cloud().size(), 1);
    }

    shutdown_tx.send(true).unwrap();
    for agent in agents {
        agent.await.unwrap().unwrap();
    }
}

// ── Startup guard ──────────────────────────────────────────────

#[test]
fn second_bootstrap_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &[]);
    let guard = StartupGuard::new();

    let first = Bootstrap::new(&config).with_guard(&guard).run().unwrap();
    assert!(first.is_some());
    let second = Bootstrap::new(&config).with_guard(&guard).run().unwrap();
    assert!(second.is_none());
}

#[test]
fn concurrent_bootstraps_run_once() {
    const THREADS: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(static_config(dir.path(), &[]));
    let guard = Arc::new(StartupGuard::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let config = Arc::clone(&config);
            let guard = Arc::clone(&guard);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                Bootstrap::new(&config).with_guard(&guard).run().map(|node| node.is_some())
            })
        })
        .collect();

    let started: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(started.iter().filter(|s| **s).count(), 1);
}

// ── Fatal paths ────────────────────────────────────────────────

#[test]
fn zero_cloud_hash_aborts_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &[]);
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config)
        .with_guard(&guard)
        .with_protocol(Arc::new(ZeroProtocol))
        .run()
        .unwrap_err();
    assert!(matches!(err, BootError::ConsistencyFault { members: 1 }));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn port_in_use_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &[]);
    let _squatter = TcpListener::bind(("127.0.0.1", config.port)).unwrap();
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config).with_guard(&guard).run().unwrap_err();
    assert!(matches!(err, BootError::NetworkBind { kind: "tcp", .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn control_port_in_use_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &[]);
    let _squatter = UdpSocket::bind(("127.0.0.1", config.port + 1)).unwrap();
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config).with_guard(&guard).run().unwrap_err();
    assert!(matches!(err, BootError::NetworkBind { kind: "udp", .. }));
}

#[test]
fn unbindable_explicit_ip_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig {
        ip: Some("192.0.2.1".to_string()),
        ..static_config(dir.path(), &[])
    };
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config).with_guard(&guard).run().unwrap_err();
    assert!(matches!(err, BootError::NetworkBind { .. }));
}

#[test]
fn missing_flatfile_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig {
        flatfile: Some(dir.path().join("does-not-exist")),
        ..static_config(dir.path(), &[])
    };
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config).with_guard(&guard).run().unwrap_err();
    assert!(matches!(err, BootError::Flatfile(_)));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn unmatched_network_spec_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClusterConfig {
        ip: None,
        network: Some("172.16.0.0/12".to_string()),
        ..static_config(dir.path(), &[])
    };
    let guard = StartupGuard::new();

    let err = Bootstrap::new(&config)
        .with_guard(&guard)
        .with_interfaces(vec![LocalInterface::new("lo", "127.0.0.1".parse().unwrap())])
        .run()
        .unwrap_err();
    assert!(matches!(err, BootError::NoMatchingInterface { .. }));
}

#[test]
fn known_build_checksum_reaches_heartbeat() {
    let dir = tempfile::tempdir().unwrap();
    let config = static_config(dir.path(), &[]);
    let guard = StartupGuard::new();
    let version = BuildVersion {
        commit: "0123abcd",
        project_version: "0.1.0",
        ..BuildVersion::unknown()
    };

    let node = Bootstrap::new(&config)
        .with_guard(&guard)
        .with_version(version.clone())
        .run()
        .unwrap()
        .unwrap();
    assert_eq!(node.heartbeat_record().build_checksum, version.checksum());
    assert_ne!(node.heartbeat_record().build_checksum, 0);
}
