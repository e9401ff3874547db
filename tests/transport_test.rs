use async_trait::async_trait;
use rand::RngCore;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qsocket::{
    connect, connect_with, BytesCodec, Codec, Connection, Context, Echo, Handler,
    HandlerFactory, JsonCodec, Listener, State, TransportConfig,
};

type JsonConn = Connection<JsonCodec<Value>>;

fn fast_config() -> TransportConfig {
    TransportConfig {
        poll_interval_ms: 20,
        accept_poll_interval_ms: 50,
        ..Default::default()
    }
}

/// Fail the test instead of hanging when a close is never observed.
async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

async fn listener_with<C: Codec>(codec: C, handler: Arc<dyn Handler<C>>) -> Listener<C> {
    Listener::bind(
        "127.0.0.1:0",
        fast_config(),
        HandlerFactory::new(Arc::new(codec), handler),
    )
    .await
    .unwrap()
}

/// alice is the client side, bob the accepted side.
async fn json_pair() -> (Listener<JsonCodec<Value>>, JsonConn, JsonConn) {
    let listener = Listener::bind(
        "127.0.0.1:0",
        fast_config(),
        HandlerFactory::deliver(Arc::new(JsonCodec::new())),
    )
    .await
    .unwrap();
    let alice = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let bob = within(listener.accept()).await.unwrap();
    (listener, alice, bob)
}

// ============================================================================
// ECHO
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_string_echo() {
    let listener = listener_with(JsonCodec::<Value>::new(), Arc::new(Echo)).await;
    let alice = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let _bob = within(listener.accept()).await.unwrap();

    alice.send(&json!("Hello echo!")).await.unwrap();
    assert_eq!(within(alice.receive()).await, Some(json!("Hello echo!")));

    within(alice.close(true)).await;
    within(listener.close(true)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_size_ladder() {
    let listener = listener_with(BytesCodec, Arc::new(Echo)).await;
    let alice = connect(listener.local_addr(), BytesCodec, fast_config())
        .await
        .unwrap();
    let _bob = within(listener.accept()).await.unwrap();

    let mut rng = rand::thread_rng();
    for size in [100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000] {
        let mut payload = vec![0u8; size];
        rng.fill_bytes(&mut payload);

        alice.send(&payload).await.unwrap();
        let echoed = within(alice.receive()).await.unwrap();
        assert_eq!(echoed.len(), size);
        assert!(echoed == payload, "payload of {} bytes corrupted", size);
    }

    let stats = alice.stats();
    assert_eq!(stats.frames_sent, 6);
    assert_eq!(stats.frames_received, 6);
    assert_eq!(stats.bytes_sent, stats.bytes_received);
}

// ============================================================================
// BIDIRECTIONAL TRAFFIC
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_pong() {
    let (_listener, alice, bob) = json_pair().await;

    let subscribe = json!({"action": "subscribe", "name": "foo"});
    alice.send(&subscribe).await.unwrap();
    assert_eq!(within(bob.receive()).await, Some(subscribe));

    let update = json!({"action": "update", "name": "foo", "value": 120.2});
    bob.send(&update).await.unwrap();
    assert_eq!(within(alice.receive()).await, Some(update));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simultaneous_both_directions() {
    let (_listener, alice, bob) = json_pair().await;
    let alice = Arc::new(alice);
    let bob = Arc::new(bob);

    let a = alice.clone();
    let b = bob.clone();
    let a_to_b = tokio::spawn(async move {
        for i in 0..200 {
            a.send(&json!({"from": "alice", "seq": i})).await.unwrap();
        }
    });
    let b_to_a = tokio::spawn(async move {
        for i in 0..200 {
            b.send(&json!({"from": "bob", "seq": i})).await.unwrap();
        }
    });

    for i in 0..200 {
        assert_eq!(
            within(bob.receive()).await,
            Some(json!({"from": "alice", "seq": i}))
        );
        assert_eq!(
            within(alice.receive()).await,
            Some(json!({"from": "bob", "seq": i}))
        );
    }
    a_to_b.await.unwrap();
    b_to_a.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_do_not_interleave() {
    let (_listener, alice, bob) = json_pair().await;

    let mut tasks = Vec::new();
    for sender in 0..8 {
        let handle = alice.handle();
        tasks.push(tokio::spawn(async move {
            for seq in 0..50 {
                // Large enough that a frame spans several writes
                let filler = "x".repeat(4096);
                handle
                    .send(&json!({"sender": sender, "seq": seq, "filler": filler}))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut next_seq = [0u64; 8];
    for _ in 0..400 {
        let msg = within(bob.receive()).await.unwrap();
        let sender = msg["sender"].as_u64().unwrap() as usize;
        assert_eq!(msg["seq"].as_u64().unwrap(), next_seq[sender]);
        assert_eq!(msg["filler"].as_str().unwrap().len(), 4096);
        next_seq[sender] += 1;
    }
    assert_eq!(next_seq, [50; 8]);
}

// ============================================================================
// CLOSE PROPAGATION
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_close() {
    let (_listener, alice, bob) = json_pair().await;

    let create = json!({"action": "create", "name": "foo"});
    alice.send(&create).await.unwrap();
    assert_eq!(within(bob.receive()).await, Some(create));

    within(bob.close(true)).await;
    within(alice.closed()).await;

    let err = alice
        .send(&json!({"action": "update", "name": "foo", "value": 120.2}))
        .await
        .unwrap_err();
    assert!(err.is_io(), "expected an I/O-class error, got {}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_close_delivers_sentinels() {
    let (_listener, alice, bob) = json_pair().await;

    alice.send(&json!({"action": "create"})).await.unwrap();
    assert!(within(bob.receive()).await.is_some());

    within(bob.close(true)).await;
    assert_eq!(bob.state(), State::Closed);
    assert_eq!(within(bob.receive()).await, None);
    assert_eq!(within(alice.receive()).await, None);

    // Terminal state stays observable
    assert_eq!(within(bob.receive()).await, None);
    assert_eq!(within(alice.receive()).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_idle_connection_after_traffic() {
    let listener = listener_with(JsonCodec::<Value>::new(), Arc::new(Echo)).await;
    let alice = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let bob = within(listener.accept()).await.unwrap();

    alice.send(&json!("ping")).await.unwrap();
    assert_eq!(within(alice.receive()).await, Some(json!("ping")));

    // Both pumps sit idle for several poll intervals
    tokio::time::sleep(Duration::from_millis(200)).await;

    within(bob.close(true)).await;
    assert_eq!(bob.state(), State::Closed);
    within(alice.closed()).await;
    assert_eq!(within(alice.receive()).await, None);

    let err = alice.send(&json!("late")).await.unwrap_err();
    assert!(err.is_io(), "expected an I/O-class error, got {}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_close() {
    let (_listener, alice, bob) = json_pair().await;

    alice.send(&json!({"action": "create"})).await.unwrap();
    assert!(within(bob.receive()).await.is_some());

    within(alice.close(true)).await;
    within(bob.closed()).await;

    let err = bob.send(&json!({"action": "update"})).await.unwrap_err();
    assert!(err.is_io(), "expected an I/O-class error, got {}", err);

    assert_eq!(within(alice.receive()).await, None);
    assert_eq!(within(bob.receive()).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_twice() {
    let (listener, alice, _bob) = json_pair().await;

    within(alice.close(false)).await;
    within(alice.close(true)).await;
    within(alice.close(true)).await;
    assert_eq!(within(alice.receive()).await, None);

    within(listener.close(true)).await;
    within(listener.close(true)).await;
    assert!(within(listener.accept()).await.is_none());
    assert!(within(listener.accept()).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queued_messages_survive_close() {
    let (_listener, alice, bob) = json_pair().await;

    for i in 0..5 {
        alice.send(&json!(i)).await.unwrap();
    }
    within(alice.close(true)).await;
    within(bob.closed()).await;

    // Everything framed before the close is still delivered, then the sentinel
    for i in 0..5 {
        assert_eq!(within(bob.receive()).await, Some(json!(i)));
    }
    assert_eq!(within(bob.receive()).await, None);
}

// ============================================================================
// LISTENER
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_handoff() {
    let listener: Listener<JsonCodec<Value>> = Listener::bind(
        "127.0.0.1:0",
        fast_config(),
        HandlerFactory::deliver(Arc::new(JsonCodec::<Value>::new())),
    )
    .await
    .unwrap();

    let first = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let first_accepted = within(listener.accept()).await.unwrap();
    let second = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let second_accepted = within(listener.accept()).await.unwrap();

    assert_eq!(first_accepted.peer_addr(), first.local_addr());
    assert_eq!(second_accepted.peer_addr(), second.local_addr());

    second.send(&json!("to second")).await.unwrap();
    first.send(&json!("to first")).await.unwrap();

    assert_eq!(within(first_accepted.receive()).await, Some(json!("to first")));
    assert_eq!(within(second_accepted.receive()).await, Some(json!("to second")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_close_keeps_accepted_connections() {
    let (listener, alice, bob) = json_pair().await;

    within(listener.close(true)).await;
    assert_eq!(listener.state(), State::Closed);

    alice.send(&json!("still here")).await.unwrap();
    assert_eq!(within(bob.receive()).await, Some(json!("still here")));
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Queues everything, closes the connection on "stop", counts close hooks.
struct StopOnCommand {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<JsonCodec<Value>> for StopOnCommand {
    async fn on_message(&self, ctx: &Context<JsonCodec<Value>>, item: Value) -> qsocket::Result<()> {
        if item == json!("stop") {
            ctx.close().await;
            return Ok(());
        }
        ctx.deliver(item)
    }

    async fn on_close(&self, ctx: &Context<JsonCodec<Value>>) {
        // Socket is still usable here
        let _ = ctx.send(&json!("bye")).await;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_from_inside_handler() {
    let closes = Arc::new(AtomicUsize::new(0));
    let listener = listener_with(
        JsonCodec::<Value>::new(),
        Arc::new(StopOnCommand {
            closes: closes.clone(),
        }),
    )
    .await;
    let alice = connect(listener.local_addr(), JsonCodec::new(), fast_config())
        .await
        .unwrap();
    let bob = within(listener.accept()).await.unwrap();

    alice.send(&json!("hello")).await.unwrap();
    alice.send(&json!("stop")).await.unwrap();

    assert_eq!(within(bob.receive()).await, Some(json!("hello")));
    assert_eq!(within(bob.receive()).await, None);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // The close hook's farewell arrives before the peer sees the close
    assert_eq!(within(alice.receive()).await, Some(json!("bye")));
    assert_eq!(within(alice.receive()).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_side_handler() {
    let listener = listener_with(JsonCodec::<Value>::new(), Arc::new(Echo)).await;
    let closes = Arc::new(AtomicUsize::new(0));
    let alice = connect_with(
        listener.local_addr(),
        Arc::new(JsonCodec::new()),
        fast_config(),
        Arc::new(StopOnCommand {
            closes: closes.clone(),
        }),
    )
    .await
    .unwrap();
    let _bob = within(listener.accept()).await.unwrap();

    // The echo server bounces "stop" back, which closes alice from its own pump
    alice.send(&json!("stop")).await.unwrap();
    within(alice.closed()).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(within(alice.receive()).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_receive_from_plain_thread() {
    let (_listener, alice, bob) = json_pair().await;
    let bob = Arc::new(bob);

    let reader = bob.clone();
    let received = tokio::task::spawn_blocking(move || {
        let first = reader.blocking_receive();
        let second = reader.blocking_receive();
        (first, second)
    });

    alice.send(&json!({"n": 1})).await.unwrap();
    within(alice.close(true)).await;

    let (first, second) = within(received).await.unwrap();
    assert_eq!(first, Some(json!({"n": 1})));
    assert_eq!(second, None);
}
