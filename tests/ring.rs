use cdht::chord::types::{FileId, PeerId, RingSnapshot};
use cdht::config::{PeerConfig, Timing};
use cdht::network::node::RingPeer;
use cdht::storage::FileStore;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn timing() -> Timing {
    Timing {
        ping_interval_ms: 100,
        ping_timeout_ms: 50,
        max_fails: 3,
        repair_grace_ms: 100,
        ack_timeout_ms: 50,
        receive_idle_timeout_ms: 5_000,
        control_timeout_ms: 1_000,
        quit_ack_timeout_ms: 3_000,
        ..Timing::default()
    }
}

async fn start_peer(
    base_port: u16,
    (id, first, second): (u32, u32, u32),
    drop_prob: f64,
    dir: &Path,
) -> RingPeer {
    let data_dir = dir.join(format!("peer{}", id));
    std::fs::create_dir_all(&data_dir).unwrap();
    let mut config = PeerConfig::new(PeerId(id), PeerId(first), PeerId(second), 300, drop_prob);
    config.base_port = base_port;
    config.data_dir = data_dir;
    config.timing = timing();
    RingPeer::start(config).await.unwrap()
}

/// Start one peer per `(id, first, second)` triple, each with its own data directory
async fn start_ring(base_port: u16, ring: &[(u32, u32, u32)], dir: &Path) -> Vec<RingPeer> {
    let mut peers = Vec::new();
    for &triple in ring {
        peers.push(start_peer(base_port, triple, 0.0, dir).await);
    }
    peers
}

async fn wait_for_file(path: &Path, check: impl Fn(&[u8]) -> bool) {
    let poll = async {
        loop {
            if let Ok(bytes) = tokio::fs::read(path).await {
                if check(&bytes) {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .unwrap_or_else(|_| panic!("{} never reached the expected content", path.display()));
}

/// Poll `peer` until its ring state satisfies `check`
async fn wait_for_state(peer: &RingPeer, check: impl Fn(&RingSnapshot) -> bool) -> RingSnapshot {
    let poll = async {
        loop {
            let snapshot = peer.debug_dump_state().await.unwrap();
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .unwrap_or_else(|_| panic!("peer {} never reached the expected state", peer.id()))
}

async fn stop_all(peers: Vec<RingPeer>) {
    for peer in peers {
        peer.shutdown();
        peer.wait().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_is_routed_to_owner_and_file_delivered() {
    let dir = TempDir::new().unwrap();
    let peers = start_ring(
        21000,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 10), (8, 10, 1), (10, 1, 3)],
        dir.path(),
    )
    .await;

    // 265 mod 256 = 9, which falls in (8, 10]
    let file = FileId(265);
    let content: Vec<u8> = (0..5_000u32).map(|i| (i % 253) as u8).collect();
    let owner_store = FileStore::new(dir.path().join("peer10"));
    tokio::fs::write(owner_store.served_path(file), &content)
        .await
        .unwrap();

    peers[0].submit_file_request(file).await.unwrap();

    let received = FileStore::new(dir.path().join("peer1")).received_path(file);
    let arrived = async {
        loop {
            if tokio::fs::read(&received).await.ok().as_deref() == Some(&content[..]) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), arrived)
        .await
        .expect("file never arrived at the requester");

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_quit_hands_successors_to_predecessors() {
    let dir = TempDir::new().unwrap();
    let mut peers = start_ring(
        21100,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 10), (8, 10, 1), (10, 1, 3)],
        dir.path(),
    )
    .await;

    let departing = peers.remove(2);
    wait_for_state(&departing, |s| {
        s.first_predecessor == Some(PeerId(3)) && s.second_predecessor == Some(PeerId(1))
    })
    .await;

    let outcome = departing.initiate_graceful_quit().await.unwrap();
    assert!(outcome.complete);
    assert_eq!(outcome.acknowledged, vec![PeerId(1), PeerId(3)]);
    departing.wait().await.unwrap();

    let q = peers[1].debug_dump_state().await.unwrap();
    assert_eq!((q.first_successor, q.second_successor), (PeerId(8), PeerId(10)));
    let r = peers[0].debug_dump_state().await.unwrap();
    assert_eq!((r.first_successor, r.second_successor), (PeerId(3), PeerId(8)));

    // peer 8 eventually learns peer 3 as its new first predecessor
    wait_for_state(&peers[2], |s| s.first_predecessor == Some(PeerId(3))).await;

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_first_successor_is_replaced() {
    let dir = TempDir::new().unwrap();
    let mut peers = start_ring(
        21200,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 1), (8, 1, 3)],
        dir.path(),
    )
    .await;

    let victim = peers.remove(1);
    victim.shutdown();
    victim.wait().await.unwrap();

    let repaired = wait_for_state(&peers[0], |s| {
        s.first_successor == PeerId(5) && s.second_successor == PeerId(8)
    })
    .await;
    assert_eq!(repaired.self_id, PeerId(1));

    // peer 8 lost its second successor and asks peer 1, which now points at 5
    wait_for_state(&peers[2], |s| {
        s.first_successor == PeerId(1) && s.second_successor == PeerId(5)
    })
    .await;

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_second_successor_is_replaced() {
    let dir = TempDir::new().unwrap();
    let mut peers = start_ring(
        21300,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 1), (8, 1, 3)],
        dir.path(),
    )
    .await;

    let victim = peers.remove(2);
    victim.shutdown();
    victim.wait().await.unwrap();

    // peer 3 loses its first successor and repairs directly
    wait_for_state(&peers[1], |s| {
        s.first_successor == PeerId(8) && s.second_successor == PeerId(1)
    })
    .await;
    // peer 1 waits out the grace period, then takes peer 3's new first successor
    wait_for_state(&peers[0], |s| {
        s.first_successor == PeerId(3) && s.second_successor == PeerId(8)
    })
    .await;

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unanswered_repair_is_asked_again() {
    let dir = TempDir::new().unwrap();
    let lonely = start_peer(21400, (1, 3, 5), 0.0, dir.path()).await;

    // peer 3 never answers and peer 5 is not up yet to name a replacement
    wait_for_state(&lonely, |s| {
        s.first_successor == PeerId(5) && s.second_successor == PeerId(5)
    })
    .await;

    let five = start_peer(21400, (5, 8, 1), 0.0, dir.path()).await;
    let eight = start_peer(21400, (8, 1, 5), 0.0, dir.path()).await;

    wait_for_state(&lonely, |s| {
        s.first_successor == PeerId(5) && s.second_successor == PeerId(8)
    })
    .await;

    stop_all(vec![lonely, five, eight]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_quit_lets_a_running_upload_finish() {
    let dir = TempDir::new().unwrap();
    let mut peers = Vec::new();
    for (triple, drop_prob) in [
        ((1, 3, 5), 0.0),
        ((3, 5, 8), 0.3),
        ((5, 8, 1), 0.0),
        ((8, 1, 3), 0.0),
    ] {
        peers.push(start_peer(21500, triple, drop_prob, dir.path()).await);
    }

    // 258 mod 256 = 2, owned by peer 3
    let file = FileId(258);
    let content: Vec<u8> = (0..12_000u32).map(|i| (i % 241) as u8).collect();
    let owner_store = FileStore::new(dir.path().join("peer3"));
    tokio::fs::write(owner_store.served_path(file), &content)
        .await
        .unwrap();

    peers[0].submit_file_request(file).await.unwrap();
    let received = FileStore::new(dir.path().join("peer1")).received_path(file);
    wait_for_file(&received, |_| true).await;

    let owner = peers.remove(1);
    owner.initiate_graceful_quit().await.unwrap();
    owner.wait().await.unwrap();

    wait_for_file(&received, |bytes| bytes == &content[..]).await;

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_for_a_missing_file_delivers_nothing() {
    let dir = TempDir::new().unwrap();
    let peers = start_ring(
        21600,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 1), (8, 1, 3)],
        dir.path(),
    )
    .await;

    // owned by peer 3, which has no 0258.pdf
    let file = FileId(258);
    peers[0].submit_file_request(file).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let received = FileStore::new(dir.path().join("peer1")).received_path(file);
    assert!(!received.exists());
    // the owner keeps serving the ring
    peers[1].debug_dump_state().await.unwrap();

    stop_all(peers).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn requesting_a_file_owned_by_yourself_downloads_nothing() {
    let dir = TempDir::new().unwrap();
    let peers = start_ring(
        21700,
        &[(1, 3, 5), (3, 5, 8), (5, 8, 1), (8, 1, 3)],
        dir.path(),
    )
    .await;

    let file = FileId(3);
    let store = FileStore::new(dir.path().join("peer3"));
    tokio::fs::write(store.served_path(file), b"local").await.unwrap();

    // travels round the ring and comes back to peer 3 as the owner
    peers[1].submit_file_request(file).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!store.received_path(file).exists());
    assert_eq!(tokio::fs::read(store.served_path(file)).await.unwrap(), b"local");

    stop_all(peers).await;
}
