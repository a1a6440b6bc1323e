//! End-to-end routing scenarios, run over real loopback TCP with an
//! in-memory KV store standing in for the shared Redis cluster.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pushmesh_msgserver::dispatcher::handle_connection;
use pushmesh_msgserver::peer::PeerPool;
use pushmesh_msgserver::state::MsgServerState;
use pushmesh_proto::{Command, ManagerInboundCmd};
use pushmesh_storage::{InMemoryKvStore, KvStore, SessionStore, TopicStore};
use tokio::net::{TcpListener, TcpStream};

/// Start a msgserver node bound to loopback, sharing `kv` with any other
/// nodes in the test (standing in for a shared Redis cluster). A real
/// Manager-style subscriber is also dialed against the node's own control
/// channels, mirroring session/topic broadcasts into `kv` exactly as the
/// Manager binary would — the MsgServer itself never writes to the KV
/// store directly. Returns the node's bound address.
async fn spawn_node(kv: Arc<dyn KvStore>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let session_store = SessionStore::new(kv.clone());
    let topic_store = TopicStore::new(kv);
    let state = Arc::new(MsgServerState::new(addr.clone(), session_store.clone(), topic_store.clone()));
    let peers = Arc::new(PeerPool::default());

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(handle_connection(state.clone(), peers.clone(), stream));
        }
    });

    // dial_and_subscribe sends SUBSCRIBE_CHANNEL_CMD for both control
    // channels over a single connection; one mirror loop covers both.
    let control = pushmesh_manager::subscriber::dial_and_subscribe(&addr, "test-manager")
        .await
        .unwrap();
    tokio::spawn(pushmesh_manager::subscriber::run_mirror_loop(
        addr.clone(),
        control,
        session_store,
        topic_store,
    ));

    addr
}

async fn connect(addr: &str) -> pushmesh_proto::Framed {
    let stream = TcpStream::connect(addr).await.unwrap();
    pushmesh_proto::framed(stream)
}

async fn send(framed: &mut pushmesh_proto::Framed, cmd: Command) {
    framed.send(Bytes::from(cmd.encode())).await.unwrap();
}

async fn recv_payload(framed: &mut pushmesh_proto::Framed) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("timed out waiting for delivery")
        .unwrap()
        .unwrap();
    String::from_utf8(frame.to_vec()).unwrap()
}

async fn register(addr: &str, client_id: &str) -> pushmesh_proto::Framed {
    let mut framed = connect(addr).await;
    send(&mut framed, Command::SendClientId { client_id: client_id.to_string() }).await;
    // Give the registration's control-channel broadcast a moment; no reply
    // is sent to the client itself (fire-and-forget protocol).
    tokio::time::sleep(Duration::from_millis(20)).await;
    framed
}

fn shared_kv() -> Arc<dyn KvStore> {
    Arc::new(InMemoryKvStore::new(Some("push".to_string())))
}

#[tokio::test]
async fn registration_mirrors_session_into_kv() {
    let kv = shared_kv();
    let addr = spawn_node(kv.clone()).await;

    // Drain the control-channel broadcast as a Manager would, mirroring it
    // into KV ourselves (the Manager binary is exercised separately).
    let mut control = connect(&addr).await;
    send(
        &mut control,
        Command::SubscribeChannel {
            channel: pushmesh_proto::SYSCTRL_CLIENT_STATUS.to_string(),
            subscriber_uuid: Some("mgr-1".to_string()),
        },
    )
    .await;

    let _alice = register(&addr, "alice").await;

    let frame = tokio::time::timeout(Duration::from_secs(2), control.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let cmd = ManagerInboundCmd::decode(&frame).unwrap();
    match cmd {
        ManagerInboundCmd::StoreSession(store) => {
            assert_eq!(store.client_id, "alice");
            assert_eq!(store.msg_server_addr, addr);
        }
        other => panic!("expected StoreSession, got {other:?}"),
    }
}

#[tokio::test]
async fn cross_node_p2p_delivers_to_peer_node() {
    let kv = shared_kv();
    let m1 = spawn_node(kv.clone()).await;
    let m2 = spawn_node(kv.clone()).await;

    let mut alice = register(&m1, "alice").await;
    let mut bob = register(&m2, "bob").await;

    send(
        &mut alice,
        Command::SendMessageP2p { dest_client_id: "bob".to_string(), payload: "hi".to_string() },
    )
    .await;

    let received = recv_payload(&mut bob).await;
    assert_eq!(received, "hi");
}

#[tokio::test]
async fn topic_broadcast_reaches_every_member_exactly_once() {
    let kv = shared_kv();
    let m1 = spawn_node(kv.clone()).await;
    let m2 = spawn_node(kv.clone()).await;

    let mut alice = register(&m1, "alice").await;
    let mut carol = register(&m1, "carol").await;
    let mut bob = register(&m2, "bob").await;

    send(&mut alice, Command::CreateTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    send(&mut bob, Command::JoinTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    send(&mut carol, Command::JoinTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    send(
        &mut alice,
        Command::SendMessageTopic { name: "t".to_string(), payload: "hello".to_string() },
    )
    .await;

    assert_eq!(recv_payload(&mut bob).await, "hello");
    assert_eq!(recv_payload(&mut carol).await, "hello");

    let topic_store = TopicStore::new(kv);
    let stored = topic_store.get("t").await.unwrap().unwrap();
    let mut members = stored.member_list.clone();
    members.sort();
    let mut expected = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
    expected.sort();
    assert_eq!(members, expected);
}

#[tokio::test]
async fn unknown_destination_is_silently_dropped_and_connection_stays_open() {
    let kv = shared_kv();
    let addr = spawn_node(kv).await;
    let mut alice = register(&addr, "alice").await;

    send(
        &mut alice,
        Command::SendMessageP2p { dest_client_id: "ghost".to_string(), payload: "hi".to_string() },
    )
    .await;

    // The connection must still process further commands afterwards.
    send(&mut alice, Command::SendPing).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn duplicate_client_id_registration_is_rejected() {
    let kv = shared_kv();
    let addr = spawn_node(kv.clone()).await;

    let mut first = register(&addr, "alice").await;
    let _second = register(&addr, "alice").await;

    // The table entry should still point at the first connection: sending
    // through it still delivers.
    let mut sender = connect(&addr).await;
    send(&mut sender, Command::SendClientId { client_id: "sender".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    send(
        &mut sender,
        Command::SendMessageP2p { dest_client_id: "alice".to_string(), payload: "ping".to_string() },
    )
    .await;

    assert_eq!(recv_payload(&mut first).await, "ping");
}

#[tokio::test]
async fn idempotent_join_does_not_grow_member_list() {
    let kv = shared_kv();
    let addr = spawn_node(kv.clone()).await;
    let mut alice = register(&addr, "alice").await;

    send(&mut alice, Command::CreateTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    send(&mut alice, Command::JoinTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    send(&mut alice, Command::JoinTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let topic_store = TopicStore::new(kv);
    let stored = topic_store.get("t").await.unwrap().unwrap();
    assert_eq!(stored.member_list, vec!["alice".to_string()]);
}

#[tokio::test]
async fn creator_disconnect_tears_down_topic_locally_and_in_kv() {
    let kv = shared_kv();
    let addr = spawn_node(kv.clone()).await;
    let topic_store = TopicStore::new(kv.clone());

    let mut alice = register(&addr, "alice").await;
    send(&mut alice, Command::CreateTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(topic_store.get("t").await.unwrap().is_some());

    drop(alice); // creator's socket closes
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(topic_store.get("t").await.unwrap(), None, "topic must be gone from KV after creator disconnect");

    // The name is free again, both locally and cluster-wide: a fresh
    // CREATE_TOPIC_CMD for "t" must succeed rather than hit TOPIC_EXISTS.
    let mut bob = register(&addr, "bob").await;
    send(&mut bob, Command::CreateTopic { name: "t".to_string() }).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stored = topic_store.get("t").await.unwrap().unwrap();
    assert_eq!(stored.creator_id, "bob");
}

#[tokio::test]
async fn concurrent_duplicate_registrations_leave_exactly_one_winner() {
    let kv = shared_kv();
    let addr = spawn_node(kv.clone()).await;

    let mut first = connect(&addr).await;
    let mut second = connect(&addr).await;

    tokio::join!(
        send(&mut first, Command::SendClientId { client_id: "alice".to_string() }),
        send(&mut second, Command::SendClientId { client_id: "alice".to_string() }),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Exactly one of the two connections owns "alice" in the session
    // table: a P2P message addressed to "alice" must be delivered to
    // exactly one of them.
    let mut sender = register(&addr, "sender").await;
    send(
        &mut sender,
        Command::SendMessageP2p { dest_client_id: "alice".to_string(), payload: "ping".to_string() },
    )
    .await;

    let winner = tokio::select! {
        payload = recv_payload(&mut first) => payload,
        payload = recv_payload(&mut second) => payload,
    };
    assert_eq!(winner, "ping");
}
