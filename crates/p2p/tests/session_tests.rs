//! Session-level integration tests over localhost TCP.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use umbra_bus::{EventBus, RpcBus};
use umbra_mempool::{Mempool, MempoolConfig};
use umbra_oracle::harness::HarnessOracle;
use umbra_oracle::Oracle;
use umbra_p2p::{Direction, MessageProcessor, P2pError, Session, SessionConfig};
use umbra_storage::{Database, DatabaseConfig};
use umbra_types::transaction::Transfer;
use umbra_types::{ContractCall, Hash};
use umbra_wire::Magic;

/// One in-process node: buses, store, mempool and a session factory.
struct Node {
    _dir: TempDir,
    event_bus: Arc<EventBus>,
    mempool: Arc<Mempool>,
    session: Arc<Session>,
    cancel: CancellationToken,
}

fn tx(fee: u64, tag: u8) -> ContractCall {
    ContractCall::Transfer(Transfer {
        fee,
        nullifiers: vec![Hash::sha3(&[tag])],
        outputs: vec![],
        proof: vec![],
    })
}

fn node(magic: Magic) -> Node {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path(), DatabaseConfig::default()).unwrap());
    let event_bus = Arc::new(EventBus::new());
    let rpc_bus = Arc::new(RpcBus::new());
    let oracle = Arc::new(HarnessOracle::new());

    let mempool = Arc::new(Mempool::new(
        oracle as Arc<dyn Oracle>,
        Arc::clone(&event_bus),
        MempoolConfig::default(),
    ));
    let cancel = CancellationToken::new();
    Arc::clone(&mempool)
        .spawn(Arc::clone(&rpc_bus), cancel.clone())
        .unwrap();

    let processor = Arc::new(MessageProcessor::new(
        Arc::clone(&event_bus),
        rpc_bus,
        db,
    ));
    let session = Arc::new(Session::new(
        processor,
        Arc::clone(&event_bus),
        SessionConfig {
            magic,
            idle_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_millis(500),
        },
    ));

    Node {
        _dir: dir,
        event_bus,
        mempool,
        session,
        cancel,
    }
}

/// Wire two nodes together over localhost; returns once both sessions run.
async fn link(a: &Node, b: &Node) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let a_session = Arc::clone(&a.session);
    let a_cancel = a.cancel.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = a_session.run(stream, Direction::Inbound, a_cancel).await;
    });

    let b_session = Arc::clone(&b.session);
    let b_cancel = b.cancel.clone();
    tokio::spawn(async move {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let _ = b_session.run(stream, Direction::Outbound, b_cancel).await;
    });
}

async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn mempools_converge_after_handshake() {
    let a = node(Magic::DevNet);
    let b = node(Magic::DevNet);

    // Node A holds two verified transactions before B ever connects.
    let t1 = tx(100, 1);
    let t2 = tx(200, 2);
    a.mempool.process_tx(t1.clone(), 0).await.unwrap();
    a.mempool.process_tx(t2.clone(), 0).await.unwrap();

    link(&a, &b).await;

    // B requests A's pool on handshake, walks Inv -> GetData -> Tx, and
    // verifies both transactions into its own pool.
    let pool = b.mempool.pool();
    wait_for("mempool convergence", || {
        let pool = pool.read();
        pool.contains(&t1.hash()) && pool.contains(&t2.hash())
    })
    .await;

    a.cancel.cancel();
    b.cancel.cancel();
}

#[tokio::test]
async fn gossiped_tx_reaches_the_remote_pool() {
    let a = node(Magic::DevNet);
    let b = node(Magic::DevNet);
    link(&a, &b).await;

    // Give the handshake a moment to settle.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A learns a new transaction; its inventory advertisement must pull it
    // into B's pool.
    let t = tx(500, 9);
    a.mempool.process_tx(t.clone(), 0).await.unwrap();

    let pool = b.mempool.pool();
    wait_for("tx propagation", || pool.read().contains(&t.hash())).await;

    a.cancel.cancel();
    b.cancel.cancel();
}

#[tokio::test]
async fn magic_mismatch_closes_the_session() {
    let a = node(Magic::MainNet);
    let b = node(Magic::TestNet);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let a_session = Arc::clone(&a.session);
    let a_cancel = a.cancel.clone();
    let inbound = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        a_session.run(stream, Direction::Inbound, a_cancel).await
    });

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let outbound = b
        .session
        .run(stream, Direction::Outbound, b.cancel.clone())
        .await;

    assert!(outbound.is_err());
    let inbound = inbound.await.unwrap();
    assert!(matches!(
        inbound,
        Err(P2pError::Wire(_)) | Err(P2pError::Handshake(_)) | Err(P2pError::Io(_))
    ));
}

#[tokio::test]
async fn keepalive_pings_flow_during_idle() {
    let a = node(Magic::DevNet);
    let b = node(Magic::DevNet);
    link(&a, &b).await;

    // Nothing happens for several keepalive windows; if ping/pong were
    // broken, the 5 s idle timeout would kill the sessions and the later
    // gossip below would never arrive.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let t = tx(300, 3);
    a.mempool.process_tx(t.clone(), 0).await.unwrap();
    let pool = b.mempool.pool();
    wait_for("post-idle propagation", || pool.read().contains(&t.hash())).await;

    a.cancel.cancel();
    b.cancel.cancel();
}

#[tokio::test]
async fn accepted_block_announcements_do_not_escape_to_peers() {
    // AcceptedBlock is a bus-only topic; publishing it must not panic the
    // writer loops or leak frames to the wire.
    let a = node(Magic::DevNet);
    let b = node(Magic::DevNet);
    link(&a, &b).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    a.event_bus.publish(
        umbra_wire::Topic::AcceptedBlock,
        umbra_wire::Payload::AcceptedBlock(Box::new(umbra_types::Block::default())),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    a.cancel.cancel();
    b.cancel.cancel();
}
