//! End-to-end pipeline tests: buffer to log to capture to snapshot,
//! and multi-node membership, routing and fan-out over shared seams.

use std::sync::Arc;
use std::time::Duration;

use scribe::config::AppConfig;
use scribe::config::BufferSettings;
use scribe::config::NodeConfig;
use scribe::config::StorageSettings;
use scribe::session::ServerMessage;
use scribe::session::SessionHandler;
use scribe::state::AppState;
use scribe_cluster::Coordinator;
use scribe_cluster::MemoryCoordinator;
use scribe_core::Edit;
use scribe_pubsub::EditBus;
use scribe_pubsub::MemoryBus;
use scribe_storage::EditStore;
use scribe_storage::MemoryStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn config(instance_id: &str) -> AppConfig {
    AppConfig {
        node: NodeConfig {
            instance_id: instance_id.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        buffer: BufferSettings {
            flush_threshold: 2,
            flush_interval_ms: 20,
        },
        storage: StorageSettings { data_dir: None },
    }
}

async fn launch(
    instance_id: &str,
    store: &Arc<MemoryStore>,
    coordinator: &Arc<MemoryCoordinator>,
    bus: &Arc<MemoryBus>,
) -> (Arc<AppState>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let state = AppState::launch_with_store(
        &config(instance_id),
        Arc::clone(store),
        Arc::clone(coordinator) as Arc<dyn Coordinator>,
        Arc::clone(bus) as Arc<dyn EditBus>,
        shutdown.clone(),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    (state, shutdown)
}

async fn wait_until<F, Fut>(description: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {description}");
}

#[tokio::test]
async fn buffered_edits_become_durable_and_materialized() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let bus = Arc::new(MemoryBus::default());
    let (state, shutdown) = launch("editor-1", &store, &coordinator, &bus).await;

    // Three edits through sequencer and buffer, below and above the
    // flush threshold of two.
    for (character, position) in [('h', "f"), ('e', "m"), ('y', "s")] {
        let seq = state.sequencer.next("doc-1").await.unwrap();
        let edit = Edit::insert("doc-1", "alice", "editor-1", character, position, seq);
        state.buffer.add(edit).await.unwrap();
    }
    state.buffer.flush_all().await.unwrap();

    wait_until("snapshot to catch up", || async {
        state.reconciler.content("doc-1").await.unwrap() == "hey"
    })
    .await;

    let persisted = store.edits_for_doc("doc-1").await.unwrap();
    assert_eq!(persisted.len(), 3);
    let seqs: Vec<u64> = persisted.iter().map(|edit| edit.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    // The reconciler marks applied edits back in the log.
    wait_until("applied flags", || async {
        store
            .edits_for_doc("doc-1")
            .await
            .unwrap()
            .iter()
            .all(|edit| edit.applied)
    })
    .await;

    assert_eq!(
        state.reconciler.vector("doc-1").await.unwrap().get("editor-1"),
        3
    );
    assert!(state.reconciler.detect_gaps("doc-1").await.unwrap().is_empty());
    shutdown.cancel();
}

#[tokio::test]
async fn two_nodes_share_membership_and_routing() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let bus = Arc::new(MemoryBus::default());
    let (node_a, shutdown_a) = launch("editor-a", &store, &coordinator, &bus).await;
    let (node_b, shutdown_b) = launch("editor-b", &store, &coordinator, &bus).await;

    wait_until("both nodes to see each other", || async {
        node_a.router.live_count() == 2 && node_b.router.live_count() == 2
    })
    .await;

    // Both nodes agree on every document's owner.
    let mut owned_by_a = None;
    for i in 0..100 {
        let doc_id = format!("doc-{i}");
        let from_a = node_a.router.route(&doc_id).unwrap();
        let from_b = node_b.router.route(&doc_id).unwrap();
        assert_eq!(from_a.id, from_b.id, "nodes disagree on '{doc_id}'");
        if owned_by_a.is_none() && from_a.id == "editor-a" {
            owned_by_a = Some(doc_id);
        }
    }
    let doc_id = owned_by_a.expect("some document owned by editor-a");

    // Edit on the owner; the shared snapshot serves reads from both.
    let (handler, mut receiver) = SessionHandler::connect(Arc::clone(&node_a));
    handler
        .handle_text(&format!(
            r#"{{"type":"SUBSCRIBE","docId":"{doc_id}","userId":"alice"}}"#
        ))
        .await;
    handler
        .handle_text(&format!(
            r#"{{"type":"OPERATION","docId":"{doc_id}","userId":"alice",
                "operationType":"INSERT","character":"w"}}"#
        ))
        .await;
    handler
        .handle_text(&format!(
            r#"{{"type":"OPERATION","docId":"{doc_id}","userId":"alice",
                "operationType":"INSERT","character":"o"}}"#
        ))
        .await;
    drain_until_acks(&mut receiver, 2).await;

    wait_until("content visible from node b", || async {
        node_b.reconciler.content(&doc_id).await.unwrap() == "wo"
    })
    .await;

    // Any instance serves a subscription, preferred owner or not; the
    // router only steers clients via the HTTP route lookup.
    let (other, mut other_rx) = SessionHandler::connect(Arc::clone(&node_b));
    other
        .handle_text(&format!(
            r#"{{"type":"SUBSCRIBE","docId":"{doc_id}","userId":"bob"}}"#
        ))
        .await;
    let subscribed = recv_matching(&mut other_rx, "SUBSCRIBED on non-owner", |frame| {
        matches!(frame, ServerMessage::Subscribed { .. })
    })
    .await;
    match subscribed {
        ServerMessage::Subscribed { content, .. } => assert_eq!(content, "wo"),
        _ => unreachable!(),
    }

    // Node B departs; everything reroutes to A, nothing else moves.
    shutdown_b.cancel();
    wait_until("node a to see the departure", || async {
        node_a.router.live_count() == 1
    })
    .await;
    for i in 0..100 {
        assert_eq!(
            node_a.router.route(&format!("doc-{i}")).unwrap().id,
            "editor-a"
        );
    }
    shutdown_a.cancel();
}

#[tokio::test]
async fn restarted_node_continues_its_sequence() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let bus = Arc::new(MemoryBus::default());

    let (state, shutdown) = launch("editor-1", &store, &coordinator, &bus).await;
    for n in 0..3 {
        let seq = state.sequencer.next("doc-1").await.unwrap();
        assert_eq!(seq, n + 1);
        let edit = Edit::insert("doc-1", "alice", "editor-1", 'x', format!("m{n}"), seq);
        state.buffer.add(edit).await.unwrap();
    }
    state.buffer.flush_all().await.unwrap();
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Same instance id, same log, fresh process state.
    let (restarted, shutdown) = launch("editor-1", &store, &coordinator, &bus).await;
    assert_eq!(restarted.sequencer.next("doc-1").await.unwrap(), 4);
    shutdown.cancel();
}

async fn recv_matching<F>(
    receiver: &mut mpsc::UnboundedReceiver<ServerMessage>,
    description: &str,
    matches: F,
) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = receiver.recv().await.expect("channel closed");
            if matches(&frame) {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
}

async fn drain_until_acks(receiver: &mut mpsc::UnboundedReceiver<ServerMessage>, count: usize) {
    for _ in 0..count {
        recv_matching(receiver, "OPERATION_ACK", |frame| {
            matches!(frame, ServerMessage::OperationAck { .. })
        })
        .await;
    }
}
