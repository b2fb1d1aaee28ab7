//! # Round-trip integration tests
//!
//! Drive the adapter, dispatcher, registry and connection manager together
//! through the library API, with an in-process peer standing in for the
//! WebSocket.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use peer_bridge::domain::envelope::{OutboundMessage, RequestEnvelope};
use peer_bridge::domain::error::codes;
use peer_bridge::ports::NoopNotifier;
use peer_bridge::{
    ConnectionManager, CorrelationId, DispatchError, PeerId, PeerOperation, RequestDispatcher,
    RoundTripRegistry, UpstreamAdapter,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::sync::mpsc;

struct Harness {
    registry: Arc<RoundTripRegistry>,
    connections: Arc<ConnectionManager>,
    dispatcher: Arc<RequestDispatcher>,
    adapter: Arc<UpstreamAdapter>,
}

fn harness(round_trip_timeout: Duration) -> Harness {
    let registry = Arc::new(RoundTripRegistry::new());
    let connections = Arc::new(ConnectionManager::new(
        Arc::clone(&registry),
        Arc::new(NoopNotifier),
    ));
    let dispatcher = Arc::new(RequestDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&connections),
        round_trip_timeout,
    ));
    let adapter = Arc::new(UpstreamAdapter::new(
        Arc::clone(&dispatcher),
        Arc::clone(&connections),
    ));
    Harness {
        registry,
        connections,
        dispatcher,
        adapter,
    }
}

fn attach(h: &Harness) -> (PeerId, mpsc::Receiver<OutboundMessage>) {
    let peer = PeerId::new();
    let (tx, rx) = mpsc::channel(256);
    h.connections.attach(peer, tx).expect("slot should be free");
    (peer, rx)
}

async fn next_request(rx: &mut mpsc::Receiver<OutboundMessage>) -> RequestEnvelope {
    loop {
        match rx.recv().await.expect("peer channel closed") {
            OutboundMessage::Request(envelope) => return envelope,
            OutboundMessage::Control(_) => continue,
        }
    }
}

fn reply(id: CorrelationId, data: Value) -> String {
    json!({"type": "round-trip-reply", "id": id, "success": true, "data": data}).to_string()
}

/// Scenario A: no peer, `tools/list` answers with an empty list.
#[tokio::test]
async fn test_list_tools_while_disconnected() {
    let h = harness(Duration::from_secs(30));

    let result = h.adapter.handle(PeerOperation::ListTools, Value::Null).await;
    assert_eq!(result.unwrap(), json!({"tools": []}));

    let result = h
        .adapter
        .handle(PeerOperation::CallTool, json!({"name": "anything"}))
        .await
        .unwrap();
    assert_eq!(result["isError"], true);

    // Nothing was ever dispatched
    assert_eq!(h.registry.stats().snapshot().registered, 0);
}

/// Scenario B: attached peer answers `list_tools`.
#[tokio::test]
async fn test_list_tools_answered_by_peer() {
    let h = harness(Duration::from_secs(30));
    let (peer, mut rx) = attach(&h);

    let call = {
        let adapter = Arc::clone(&h.adapter);
        tokio::spawn(async move { adapter.handle(PeerOperation::ListTools, json!({})).await })
    };

    let request = next_request(&mut rx).await;
    assert_eq!(request.operation, PeerOperation::ListTools);
    h.connections
        .handle_inbound(peer, &reply(request.id, json!({"tools": [{"name": "t1"}]})))
        .await;

    assert_eq!(call.await.unwrap().unwrap(), json!({"tools": [{"name": "t1"}]}));
    assert_eq!(h.registry.pending_count(), 0);
}

/// Scenario C: a silent peer times out one call, the next call still works.
#[tokio::test(start_paused = true)]
async fn test_timeout_does_not_affect_later_calls() {
    let h = harness(Duration::from_secs(30));
    let (peer, mut rx) = attach(&h);

    // Ignore the first request, answer everything after it
    let connections = Arc::clone(&h.connections);
    tokio::spawn(async move {
        let _ignored = next_request(&mut rx).await;
        loop {
            let request = next_request(&mut rx).await;
            connections
                .handle_inbound(peer, &reply(request.id, json!({"prompts": []})))
                .await;
        }
    });

    let err = h.adapter.list_tools(Value::Null).await.unwrap_err();
    assert_eq!(err.code, codes::TIMEOUT);
    assert_eq!(h.registry.pending_count(), 0);

    let result = h.adapter.list_prompts(Value::Null).await.unwrap();
    assert_eq!(result, json!({"prompts": []}));
    assert!(h.connections.is_attached());
}

/// A reply for an id that already timed out changes nothing.
#[tokio::test(start_paused = true)]
async fn test_late_reply_is_ignored() {
    let h = harness(Duration::from_secs(30));
    let (peer, mut rx) = attach(&h);

    let call = {
        let dispatcher = Arc::clone(&h.dispatcher);
        tokio::spawn(async move { dispatcher.call(PeerOperation::ListTools, json!({}), None).await })
    };
    let request = next_request(&mut rx).await;

    assert!(matches!(
        call.await.unwrap(),
        Err(DispatchError::RoundTripTimeout { .. })
    ));
    let before = h.registry.stats().snapshot();

    h.connections
        .handle_inbound(peer, &reply(request.id, json!({"tools": []})))
        .await;

    let after = h.registry.stats().snapshot();
    assert_eq!(after.resolved, before.resolved);
    assert_eq!(after.rejected, before.rejected);
    assert_eq!(after.late_replies, before.late_replies + 1);
    assert_eq!(h.registry.pending_count(), 0);
}

/// Many concurrent timeouts leave the registry empty.
#[tokio::test(start_paused = true)]
async fn test_no_leak_on_timeout() {
    let h = harness(Duration::from_secs(5));
    let (_peer, _rx) = attach(&h);

    let calls: Vec<_> = (0..32)
        .map(|_| {
            let dispatcher = Arc::clone(&h.dispatcher);
            tokio::spawn(async move { dispatcher.call(PeerOperation::ListResources, json!({}), None).await })
        })
        .collect();

    for call in calls {
        assert!(matches!(
            call.await.unwrap(),
            Err(DispatchError::RoundTripTimeout { .. })
        ));
    }

    assert_eq!(h.registry.pending_count(), 0);
    assert_eq!(h.registry.stats().snapshot().abandoned, 32);
}

/// Settle, then settle again, then abandon: only the first has an effect.
#[tokio::test]
async fn test_exactly_once_settlement() {
    let registry = RoundTripRegistry::new();
    let id = CorrelationId::new();
    let waiter = registry.register(id, "call_tool").unwrap();

    assert!(registry.settle(id, Err("boom".into())));
    assert!(!registry.settle(id, Ok(json!("late"))));
    assert!(!registry.abandon(&id));

    let settled = waiter.await.unwrap();
    assert_eq!(settled.result, Err("boom".to_string()));
    assert!(!registry.is_pending(&id));
}

/// Detaching does not fail pending calls; they still settle on reply.
#[tokio::test]
async fn test_detach_leaves_pending_calls_alone() {
    let h = harness(Duration::from_secs(30));
    let (peer, mut rx) = attach(&h);

    let call = {
        let dispatcher = Arc::clone(&h.dispatcher);
        tokio::spawn(async move { dispatcher.call(PeerOperation::ListTools, json!({}), None).await })
    };
    let request = next_request(&mut rx).await;

    assert!(h.connections.detach(peer));
    assert!(h.registry.is_pending(&request.id));

    // Reply routed through the manager after detach still settles the entry
    h.connections
        .handle_inbound(peer, &reply(request.id, json!({"tools": []})))
        .await;
    assert_eq!(call.await.unwrap(), Ok(json!({"tools": []})));
}

fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime build");
    runtime.block_on(future)
}

proptest! {
    #[test]
    fn test_concurrent_ids_are_distinct(count in 1_usize..64) {
        let ids = run_async(async move {
            let h = harness(Duration::from_secs(30));
            let (_peer, mut rx) = attach(&h);

            let calls: Vec<_> = (0..count)
                .map(|_| {
                    let dispatcher = Arc::clone(&h.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.call(PeerOperation::CallTool, json!({}), None).await
                    })
                })
                .collect();

            let mut ids = Vec::with_capacity(count);
            for _ in 0..count {
                ids.push(next_request(&mut rx).await.id);
            }
            let pending = h.registry.pending_count();

            for call in calls {
                call.abort();
            }
            (ids, pending)
        });

        let (ids, pending) = ids;
        let unique: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(unique.len(), count);
        prop_assert_eq!(pending, count);
    }
}
