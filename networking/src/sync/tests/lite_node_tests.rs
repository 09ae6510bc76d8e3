use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use super::*;
use crate::req_resp::{AccountingMessage, GetBlocksResponse, NewBlockBroadcast};
use crate::sync::{ChainSyncNode, LiteNodeHandle, LiteNodeNotification, LiteNodeSync, SyncConfig};
use crate::types::{CloseReason, NetworkEvent, NodeAddress};

struct Harness {
    sync: LiteNodeSync<MockTransport>,
    transport: Arc<MockTransport>,
    notifications: mpsc::UnboundedReceiver<LiteNodeNotification>,
}

impl Harness {
    fn new(transport: MockTransport) -> Self {
        Self::with_config(transport, SyncConfig::default())
    }

    fn with_config(transport: MockTransport, config: SyncConfig) -> Self {
        let transport = Arc::new(transport);
        let (tx, notifications) = mpsc::unbounded_channel();
        let sync = LiteNodeSync::new(
            config,
            &regtest(),
            Arc::clone(&transport),
            transport.seed_nodes.clone(),
            tx,
        );
        Self {
            sync,
            transport,
            notifications,
        }
    }

    fn two_seeds() -> Self {
        Self::new(MockTransport::with_seeds(&[SEED_A, SEED_B]))
    }

    fn request_to(&self, start_height: u32) -> (NodeAddress, u32) {
        self.transport
            .block_requests()
            .into_iter()
            .rev()
            .find(|(_, request)| request.from_height == start_height)
            .map(|(peer, request)| (peer, request.nonce))
            .expect("request sent")
    }

    async fn respond(&mut self, peer: &NodeAddress, nonce: u32, blocks: Vec<RawBlock>) {
        self.sync
            .on_network_event(NetworkEvent::Message {
                peer: peer.clone(),
                message: AccountingMessage::GetBlocksResponse(GetBlocksResponse { nonce, blocks }),
            })
            .await;
    }

    fn notifications(&mut self) -> Vec<LiteNodeNotification> {
        drain(&mut self.notifications)
    }
}

#[tokio::test(start_paused = true)]
async fn test_requested_blocks_are_delivered() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (peer, nonce) = harness.request_to(111);
    assert!(harness.sync.has_request(&peer, 111));

    harness.respond(&peer, nonce, raw_chain(111, 115, 0)).await;
    harness.sync.process_next_internal_event().await;

    assert_eq!(
        harness.notifications(),
        vec![LiteNodeNotification::RequestedBlocksReceived {
            peer,
            start_height: 111,
            blocks: raw_chain(111, 115, 0),
        }]
    );
    assert_eq!(harness.sync.requests_in_flight(), 0);
    assert_eq!(harness.sync.last_requested_height(), Some(111));
    assert_eq!(harness.sync.last_received_height(), 111);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_completes_initial_requests() {
    let mut harness = Harness::two_seeds();
    harness.sync.on_network_event(NetworkEvent::Ready).await;

    harness.sync.request_blocks(111);
    settle().await;
    let (peer, nonce) = harness.request_to(111);
    assert!(!harness.sync.can_publish());

    harness.respond(&peer, nonce, vec![]).await;
    harness.sync.process_next_internal_event().await;

    assert!(harness.sync.lifecycle().initial_block_requests_complete);
    assert!(harness.sync.can_publish());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_nonce_times_out_and_retries_other_seed() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (first_peer, nonce) = harness.request_to(111);

    harness
        .respond(&first_peer, nonce.wrapping_add(1), raw_chain(111, 112, 0))
        .await;
    harness.sync.process_next_internal_event().await;

    let notifications = harness.notifications();
    assert!(matches!(
        notifications.as_slice(),
        [LiteNodeNotification::Fault { peer: Some(peer), .. }] if *peer == first_peer
    ));

    settle().await;
    let (second_peer, _) = harness.request_to(111);
    assert_ne!(first_peer, second_peer);
    assert!(harness.sync.has_request(&second_peer, 111));
    assert_eq!(harness.transport.block_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sends_exhaust_seeds_then_schedule_retry() {
    let transport = MockTransport::with_seeds(&[SEED_A, SEED_B]);
    transport
        .failing
        .lock()
        .extend([NodeAddress::from(SEED_A), NodeAddress::from(SEED_B)]);
    let mut harness = Harness::new(transport);

    harness.sync.request_blocks(111);
    harness.sync.process_next_internal_event().await;
    harness.sync.process_next_internal_event().await;

    let faults = harness
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, LiteNodeNotification::Fault { .. }))
        .count();
    assert_eq!(faults, 2);
    assert_eq!(harness.sync.requests_in_flight(), 0);
    assert!(harness.sync.is_retry_scheduled());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_request_is_cleaned_up() {
    let transport = MockTransport::with_seeds(&[SEED_A, SEED_B]);
    transport.connect(SEED_A);
    let config = SyncConfig {
        cleanup_delay: Duration::from_secs(30),
        ..SyncConfig::default()
    };
    let mut harness = Harness::with_config(transport, config);
    let seed_a = NodeAddress::from(SEED_A);

    harness.sync.request_blocks(111);
    harness.sync.request_blocks(111);
    settle().await;

    assert_eq!(harness.sync.requests_in_flight(), 1);
    assert!(harness.sync.has_request(&seed_a, 111));
    assert_eq!(harness.transport.block_requests().len(), 1);

    harness.sync.process_next_internal_event().await;
    assert_eq!(harness.sync.requests_in_flight(), 0);

    // The terminated handler never reports back.
    tokio::time::sleep(Duration::from_secs(300)).await;
    settle().await;
    assert!(harness.notifications().is_empty());

    // The key is free again after the cleanup.
    harness.sync.request_blocks(111);
    settle().await;
    assert_eq!(harness.transport.block_requests().len(), 2);
    let (peer, nonce) = harness.request_to(111);
    assert_eq!(peer, seed_a);

    // And again after a completed request.
    harness.respond(&peer, nonce, raw_chain(111, 112, 0)).await;
    harness.sync.process_next_internal_event().await;
    assert_eq!(harness.sync.requests_in_flight(), 0);

    harness.sync.request_blocks(111);
    settle().await;
    let requests = harness.transport.block_requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|(peer, _)| *peer == seed_a));
    assert!(harness.sync.has_request(&seed_a, 111));
}

#[tokio::test(start_paused = true)]
async fn test_no_seed_node_retries_then_reports_once() {
    let mut harness = Harness::new(MockTransport::default());
    let started = tokio::time::Instant::now();

    harness.sync.request_blocks(111);
    assert_eq!(harness.sync.retry_attempts(), 1);

    for _ in 0..12 {
        harness.sync.process_next_internal_event().await;
    }

    assert_eq!(started.elapsed(), Duration::from_secs(120));
    assert_eq!(
        harness.notifications(),
        vec![LiteNodeNotification::NoSeedNodeAvailable]
    );
    assert!(!harness.sync.is_retry_scheduled());

    harness.sync.request_blocks(111);
    assert!(harness.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_only_one_retry_timer() {
    let mut harness = Harness::new(MockTransport::default());

    harness.sync.request_blocks(111);
    harness.sync.request_blocks(112);

    assert_eq!(harness.sync.retry_attempts(), 1);
    assert!(harness.sync.is_retry_scheduled());
    assert_eq!(harness.sync.last_requested_height(), Some(112));
}

#[tokio::test(start_paused = true)]
async fn test_seed_connecting_after_exhaustion_restarts() {
    let transport = MockTransport::with_seeds(&[SEED_A]);
    transport.banned.lock().insert(SEED_A.into());
    let mut harness = Harness::new(transport);

    harness.sync.request_blocks(111);
    for _ in 0..12 {
        harness.sync.process_next_internal_event().await;
    }
    assert_eq!(
        harness.notifications(),
        vec![LiteNodeNotification::NoSeedNodeAvailable]
    );

    harness.transport.banned.lock().clear();
    harness.transport.connect(SEED_A);
    harness
        .sync
        .on_network_event(NetworkEvent::Connected(SEED_A.into()))
        .await;

    assert_eq!(harness.sync.retry_attempts(), 0);
    assert!(harness.sync.has_request(&SEED_A.into(), 111));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_seed_is_asked_again_after_standby() {
    let transport = MockTransport::with_seeds(&[SEED_A]);
    transport.connect(SEED_A);
    let mut harness = Harness::new(transport);
    let seed_a = NodeAddress::from(SEED_A);

    harness.sync.request_blocks(111);
    // Timeout, then every retry finds the only seed already failed.
    for _ in 0..13 {
        harness.sync.process_next_internal_event().await;
    }
    let notifications = harness.notifications();
    assert!(matches!(
        notifications.as_slice(),
        [LiteNodeNotification::Fault { .. }, LiteNodeNotification::NoSeedNodeAvailable]
    ));
    assert_eq!(harness.sync.requests_in_flight(), 0);

    harness
        .sync
        .on_network_event(NetworkEvent::AwakeFromStandby)
        .await;
    settle().await;

    assert!(harness.sync.has_request(&seed_a, 111));
    assert_eq!(harness.transport.block_requests().len(), 2);

    let (peer, nonce) = harness.request_to(111);
    harness.respond(&peer, nonce, raw_chain(111, 111, 0)).await;
    harness.sync.process_next_internal_event().await;
    assert_eq!(
        harness.notifications(),
        vec![LiteNodeNotification::RequestedBlocksReceived {
            peer: seed_a,
            start_height: 111,
            blocks: raw_chain(111, 111, 0),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_seed_reconnecting_is_asked_again() {
    let transport = MockTransport::with_seeds(&[SEED_A]);
    transport.connect(SEED_A);
    let mut harness = Harness::new(transport);

    harness.sync.request_blocks(111);
    for _ in 0..13 {
        harness.sync.process_next_internal_event().await;
    }
    assert!(harness
        .notifications()
        .contains(&LiteNodeNotification::NoSeedNodeAvailable));

    harness
        .sync
        .on_network_event(NetworkEvent::Connected(SEED_A.into()))
        .await;
    settle().await;

    assert!(harness.sync.has_request(&SEED_A.into(), 111));
    assert_eq!(harness.transport.block_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_awake_from_standby_resets_retries() {
    let mut harness = Harness::new(MockTransport::default());

    harness.sync.request_blocks(111);
    for _ in 0..12 {
        harness.sync.process_next_internal_event().await;
    }
    assert!(!harness.sync.is_retry_scheduled());

    harness
        .sync
        .on_network_event(NetworkEvent::AwakeFromStandby)
        .await;

    assert_eq!(harness.sync.retry_attempts(), 1);
    assert!(harness.sync.is_retry_scheduled());
}

#[tokio::test(start_paused = true)]
async fn test_stale_response_is_dropped() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    harness.sync.request_blocks(121);
    settle().await;
    let (old_peer, old_nonce) = harness.request_to(111);
    let (new_peer, new_nonce) = harness.request_to(121);
    assert_ne!(old_peer, new_peer);

    harness.respond(&new_peer, new_nonce, raw_chain(121, 122, 0)).await;
    harness.sync.process_next_internal_event().await;
    harness.respond(&old_peer, old_nonce, raw_chain(111, 112, 0)).await;
    harness.sync.process_next_internal_event().await;

    let received = harness
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            LiteNodeNotification::RequestedBlocksReceived { start_height, .. } => {
                Some(start_height)
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(received, vec![121]);
    assert_eq!(harness.sync.last_received_height(), 121);
    assert_eq!(harness.sync.requests_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_relayed_once_excluding_sender() {
    let mut harness = Harness::two_seeds();
    let sender = NodeAddress::from("peer.onion:7000");
    let block = raw_block(121, 0);

    for _ in 0..2 {
        harness
            .sync
            .on_network_event(NetworkEvent::Message {
                peer: sender.clone(),
                message: AccountingMessage::NewBlockBroadcast(NewBlockBroadcast {
                    block: block.clone(),
                }),
            })
            .await;
    }

    assert_eq!(
        harness.notifications(),
        vec![LiteNodeNotification::NewBlockReceived(block.clone())]
    );
    let broadcasts = harness.transport.broadcasts.lock().clone();
    assert_eq!(
        broadcasts,
        vec![(
            AccountingMessage::NewBlockBroadcast(NewBlockBroadcast { block }),
            Some(sender)
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_banned_seed_is_removed_and_request_moves_on() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (banned, _) = harness.request_to(111);

    harness
        .sync
        .on_network_event(NetworkEvent::Disconnected {
            peer: banned.clone(),
            reason: CloseReason::Banned,
        })
        .await;

    assert!(!harness.sync.seed_nodes().contains(&banned));
    assert!(!harness.sync.has_request(&banned, 111));
    assert_eq!(harness.sync.requests_in_flight(), 1);

    settle().await;
    let (next, _) = harness.request_to(111);
    assert_ne!(next, banned);

    // Still gone after a reset.
    harness.sync.reset();
    assert_eq!(harness.sync.seed_nodes(), &[next][..]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_seed_but_requests_elsewhere() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (first, _) = harness.request_to(111);

    harness
        .sync
        .on_network_event(NetworkEvent::Disconnected {
            peer: first.clone(),
            reason: CloseReason::Shutdown,
        })
        .await;

    assert_eq!(harness.sync.seed_nodes().len(), 2);
    assert_eq!(harness.sync.requests_in_flight(), 1);
    assert!(!harness.sync.has_request(&first, 111));
}

#[tokio::test(start_paused = true)]
async fn test_all_connections_lost_restarts_request() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (first, nonce) = harness.request_to(111);

    harness
        .sync
        .on_network_event(NetworkEvent::AllConnectionsLost)
        .await;

    assert_eq!(harness.sync.requests_in_flight(), 1);
    assert!(!harness.sync.has_request(&first, 111));

    // The stopped handler no longer accepts the answer.
    harness.respond(&first, nonce, raw_chain(111, 112, 0)).await;
    settle().await;
    assert!(harness.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reset_forgets_requests_and_cursors() {
    let mut harness = Harness::two_seeds();

    harness.sync.request_blocks(111);
    settle().await;
    let (peer, nonce) = harness.request_to(111);

    harness.sync.reset();

    assert_eq!(harness.sync.requests_in_flight(), 0);
    assert_eq!(harness.sync.last_requested_height(), None);
    assert_eq!(harness.sync.last_received_height(), 0);

    harness.respond(&peer, nonce, raw_chain(111, 112, 0)).await;
    settle().await;
    assert!(harness.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lite_node_does_not_serve_blocks() {
    let mut harness = Harness::two_seeds();

    harness
        .sync
        .on_network_event(NetworkEvent::Message {
            peer: "peer.onion:7000".into(),
            message: AccountingMessage::GetBlocksRequest(crate::req_resp::GetBlocksRequest {
                from_height: 111,
                nonce: 1,
            }),
        })
        .await;

    assert!(harness.transport.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_serves_commands_and_events() {
    let harness = Harness::two_seeds();
    let Harness {
        sync,
        transport,
        mut notifications,
    } = harness;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handle = LiteNodeHandle::new(commands_tx);
    let task = tokio::spawn(sync.run(events_rx, commands_rx));

    handle.request_blocks(111).unwrap();
    settle().await;
    let (peer, request) = transport.last_block_request().unwrap();

    events_tx
        .send(NetworkEvent::Message {
            peer: peer.clone(),
            message: AccountingMessage::GetBlocksResponse(GetBlocksResponse {
                nonce: request.nonce,
                blocks: raw_chain(111, 111, 0),
            }),
        })
        .unwrap();

    let notification = notifications.recv().await.unwrap();
    assert_eq!(
        notification,
        LiteNodeNotification::RequestedBlocksReceived {
            peer,
            start_height: 111,
            blocks: raw_chain(111, 111, 0),
        }
    );

    drop(events_tx);
    task.await.unwrap();
    assert!(handle.request_blocks(112).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_request_faults_are_counted() {
    let metrics = Arc::new(metrics::Metrics::new());
    let mut harness = Harness::two_seeds();
    let (tx, notifications) = mpsc::unbounded_channel();
    harness.notifications = notifications;
    harness.sync = LiteNodeSync::new(
        SyncConfig::default(),
        &regtest(),
        Arc::clone(&harness.transport),
        harness.transport.seed_nodes.clone(),
        tx,
    )
    .with_metrics(Arc::clone(&metrics));

    harness.sync.request_blocks(111);
    harness.sync.process_next_internal_event().await;

    let text = metrics.gather().unwrap();
    assert!(text.contains("accounting_request_faults_total{reason=\"timeout\"} 1"));
    assert!(text.contains("accounting_requests_in_flight 1"));
}
