#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use mint_notify::error::Kind;
use mint_notify::rpc::RpcError;
use mint_notify::types::{MintQuoteState, ProofState, SubscriptionKind};
use mint_notify::ws::config::{Config, ReconnectConfig};
use mint_notify::ws::{ConnectionState, TransportEvent, WsError};
use mint_notify::{Client, Listener, SubscriptionState};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

/// Mock mint WebSocket endpoint.
struct MockMint {
    addr: SocketAddr,
    /// Broadcast frames to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Frames received from clients
    request_rx: mpsc::UnboundedReceiver<String>,
}

impl MockMint {
    /// Start a mock mint on a random port.
    async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Start a mock mint on `addr`, e.g. a port a client is already retrying.
    async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (request_tx, request_rx) = mpsc::unbounded_channel::<String>();

        let broadcast_tx = message_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let req_tx = request_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(req_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            request_rx,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/v1/ws", self.addr)
    }

    /// Send a frame to all connected clients.
    fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    /// Receive the next frame a client sent, parsed as JSON.
    async fn recv_request(&mut self) -> Option<Value> {
        let text = timeout(Duration::from_secs(2), self.request_rx.recv())
            .await
            .ok()
            .flatten()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Next `subscribe` request; everything received before it is pushed to `skipped`.
    async fn recv_subscribe(&mut self, skipped: &mut Vec<Value>) -> Option<Value> {
        while let Some(request) = self.recv_request().await {
            if request["method"] == json!("subscribe") {
                return Some(request);
            }
            skipped.push(request);
        }
        None
    }
}

/// A port nothing listens on, so connection attempts are refused.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn fast_retries(max_retries: u32) -> ReconnectConfig {
    ReconnectConfig::builder()
        .max_retries(max_retries)
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(50))
        .build()
}

/// JSON-RPC frames a mint sends.
mod frames {
    use serde_json::{Value, json};

    #[must_use]
    pub fn ack(request: &Value) -> String {
        json!({ "jsonrpc": "2.0", "result": true, "id": request["id"] }).to_string()
    }

    #[must_use]
    pub fn reject(request: &Value, code: i64, message: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
            "id": request["id"]
        })
        .to_string()
    }

    #[must_use]
    pub fn notification(request: &Value, payload: &Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "params": { "subId": request["params"]["subId"], "payload": payload }
        })
        .to_string()
    }
}

async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

mod subscribing {
    use super::*;

    #[tokio::test]
    async fn first_listener_sends_subscribe_and_ack_activates() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&errors);
        client
            .add_listener(
                SubscriptionKind::Bolt11MintQuote,
                "q1",
                Listener::new(|_| {}, move |_, key, error| {
                    seen.lock().unwrap().push(format!("{key}: {error}"));
                }),
            )
            .unwrap();
        client
            .add_listener(SubscriptionKind::Bolt11MintQuote, "q1", Listener::on_update(|_| {}))
            .unwrap();

        let request = mint.recv_request().await.unwrap();
        assert_eq!(request["jsonrpc"], json!("2.0"));
        assert_eq!(request["method"], json!("subscribe"));
        assert_eq!(request["id"], json!(0));
        assert_eq!(request["params"]["kind"], json!("bolt11_mint_quote"));
        assert_eq!(request["params"]["filters"], json!(["q1"]));
        assert!(request["params"]["subId"].is_string());

        assert_eq!(
            client.registry().state(SubscriptionKind::Bolt11MintQuote, "q1"),
            Some(SubscriptionState::Pending)
        );
        mint.send(&frames::ack(&request));

        eventually(|| {
            client.registry().state(SubscriptionKind::Bolt11MintQuote, "q1")
                == Some(SubscriptionState::Active)
        })
        .await;
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(client.pending_calls(), 0);

        // The second listener shared the first subscription
        let next = timeout(Duration::from_millis(200), mint.request_rx.recv()).await;
        assert!(next.is_err(), "no second subscribe expected");
    }

    #[tokio::test]
    async fn typed_stream_receives_updates() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let stream = client.subscribe_mint_quote("q1").unwrap();
        let mut stream = Box::pin(stream);

        let request = mint.recv_request().await.unwrap();
        mint.send(&frames::ack(&request));
        mint.send(&frames::notification(
            &request,
            &json!({ "quote": "q1", "request": "lnbc10n1...", "state": "PAID", "expiry": 1_701_704_757 }),
        ));

        let update = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.quote, "q1");
        assert_eq!(update.state, MintQuoteState::Paid);
        assert_eq!(update.expiry, Some(1_701_704_757));
    }

    #[tokio::test]
    async fn proof_state_stream_receives_updates() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();
        let y = "02599b9ea0a1ad4143706c2a5a4a568ce442dd4313e1cf1f7f0b58a317c1a355ee";

        let stream = client.subscribe_proof_state(y).unwrap();
        let mut stream = Box::pin(stream);

        let request = mint.recv_request().await.unwrap();
        assert_eq!(request["params"]["kind"], json!("proof_state"));
        mint.send(&frames::ack(&request));
        mint.send(&frames::notification(
            &request,
            &json!({ "Y": y, "state": "SPENT", "witness": null }),
        ));

        let update = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.y, y);
        assert_eq!(update.state, ProofState::Spent);
    }

    #[tokio::test]
    async fn malformed_frames_do_not_stop_delivery() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let stream = client.subscribe_melt_quote("m1").unwrap();
        let mut stream = Box::pin(stream);

        let request = mint.recv_request().await.unwrap();
        mint.send("{not json");
        mint.send(r#"{"jsonrpc":"2.0","result":true,"id":999}"#);
        mint.send(&frames::ack(&request));
        mint.send(&frames::notification(&request, &json!({ "quote": "m1", "state": "PENDING" })));

        let update = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.quote, "m1");
    }

    #[tokio::test]
    async fn rejected_subscription_ends_stream_with_error() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let stream = client.subscribe_mint_quote("gone").unwrap();
        let mut stream = Box::pin(stream);

        let request = mint.recv_request().await.unwrap();
        mint.send(&frames::reject(&request, -32602, "Invalid params"));

        let error = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(error.kind(), Kind::Rpc);
        assert_eq!(error.downcast_ref::<RpcError>().unwrap().message, "Invalid params");

        let end = timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn dropping_last_stream_unsubscribes() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let first = client.subscribe_mint_quote("q1").unwrap();
        let second = client.subscribe_mint_quote("q1").unwrap();
        let request = mint.recv_request().await.unwrap();
        mint.send(&frames::ack(&request));

        drop(first);
        assert_eq!(client.subscription_count(), 1);

        drop(second);
        let unsubscribe = mint.recv_request().await.unwrap();
        assert_eq!(unsubscribe["method"], json!("unsubscribe"));
        assert_eq!(unsubscribe["params"]["subId"], request["params"]["subId"]);
        assert_eq!(client.subscription_count(), 0);
    }

    #[tokio::test]
    async fn close_sends_close_message_and_ends_streams() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let stream = client.subscribe_mint_quote("q1").unwrap();
        let mut stream = Box::pin(stream);
        let request = mint.recv_request().await.unwrap();

        client.close(SubscriptionKind::Bolt11MintQuote, "q1").unwrap();

        let close = mint.recv_request().await.unwrap();
        assert_eq!(close, json!(["CLOSE", request["params"]["subId"]]));
        let end = timeout(Duration::from_secs(2), stream.next()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn deliver_feeds_polled_updates_to_streams() {
        let mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let stream = client.subscribe_mint_quote("q1").unwrap();
        let mut stream = Box::pin(stream);

        let watched = client.subscriptions();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].kind, SubscriptionKind::Bolt11MintQuote);
        assert_eq!(watched[0].app_key, "q1");

        client.deliver(
            SubscriptionKind::Bolt11MintQuote,
            "q1",
            &json!({ "quote": "q1", "state": "ISSUED" }),
        );

        let update = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.state, MintQuoteState::Issued);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn disconnect_rejects_new_subscriptions() {
        let mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let mut state_rx = client.state_receiver();
        timeout(Duration::from_secs(2), state_rx.wait_for(|state| state.is_open()))
            .await
            .unwrap()
            .unwrap();

        client.disconnect();
        client.disconnect();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let error = client
            .add_listener(SubscriptionKind::Bolt11MintQuote, "q1", Listener::on_update(|_| {}))
            .unwrap_err();
        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(error.downcast_ref::<WsError>(), Some(WsError::NotConnected)));
        assert_eq!(client.subscription_count(), 0);
    }

    #[tokio::test]
    async fn connect_after_disconnect_resubscribes() {
        let mut mint = MockMint::start().await;
        let client = Client::new(&mint.ws_url(), Config::default()).unwrap();

        let _stream = client.subscribe_melt_quote("m1").unwrap();
        let first = mint.recv_request().await.unwrap();
        mint.send(&frames::ack(&first));

        client.disconnect();
        client.connect();

        let mut skipped = Vec::new();
        let again = mint.recv_subscribe(&mut skipped).await.unwrap();
        assert_eq!(again["params"]["filters"], json!(["m1"]));
        assert_ne!(again["params"]["subId"], first["params"]["subId"]);
        // The id of the closed socket is retired
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0]["method"], json!("unsubscribe"));
        assert_eq!(skipped[0]["params"]["subId"], first["params"]["subId"]);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let addr = closed_port().await;

        let config = Config::builder().reconnect(fast_retries(2)).build();
        let client = Client::new(&format!("ws://{addr}/v1/ws"), config).unwrap();
        let mut events = client.events();

        let failed = timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::ReconnectFailed) => break,
                    Ok(_) => {}
                    Err(e) => panic!("event channel failed: {e}"),
                }
            }
        })
        .await;

        assert!(failed.is_ok(), "ReconnectFailed should be emitted");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // Accepts TCP but never answers the WebSocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let config = Config::builder()
            .connection_timeout(Duration::from_millis(100))
            .reconnect(fast_retries(1))
            .build();
        let client = Client::new(&format!("ws://{addr}/v1/ws"), config).unwrap();
        let mut events = client.events();

        let mut seen = Vec::new();
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                let done = event == TransportEvent::ReconnectFailed;
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 3, "{seen:?}");
        for event in &seen[..2] {
            let TransportEvent::Error { message } = event else {
                panic!("expected a timeout error, got {event:?}");
            };
            assert!(message.contains("timed out after 100ms"), "{message}");
        }
        assert!(!seen.contains(&TransportEvent::Open));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reopen_after_retry_reports_reconnected_before_open() {
        let addr = closed_port().await;
        let config = Config::builder().reconnect(fast_retries(50)).build();
        let client = Client::new(&format!("ws://{addr}/v1/ws"), config).unwrap();
        let mut events = client.events();

        let mut state_rx = client.state_receiver();
        timeout(
            Duration::from_secs(2),
            state_rx.wait_for(|state| matches!(state, ConnectionState::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        let _mint = MockMint::start_on(addr).await;

        let mut seen = Vec::new();
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                let done = event == TransportEvent::Open;
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let opened = seen.len() - 1;
        assert!(opened >= 1, "{seen:?}");
        assert_eq!(seen[opened - 1], TransportEvent::Reconnected, "{seen:?}");
        assert!(seen[..opened - 1].iter().all(|event| matches!(event, TransportEvent::Error { .. })));
        assert!(client.connection_state().is_open());
    }
}

mod reconnection {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// Mock mint that can drop every connection on demand.
    struct ReconnectableMockMint {
        addr: SocketAddr,
        request_rx: mpsc::UnboundedReceiver<String>,
        message_tx: broadcast::Sender<String>,
        disconnect_signal: Arc<AtomicBool>,
    }

    impl ReconnectableMockMint {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let (message_tx, _) = broadcast::channel::<String>(100);
            let (request_tx, request_rx) = mpsc::unbounded_channel::<String>();
            let disconnect_signal = Arc::new(AtomicBool::new(false));

            let broadcast_tx = message_tx.clone();
            let disconnect = Arc::clone(&disconnect_signal);

            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };

                    let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                        continue;
                    };

                    let (mut write, mut read) = ws_stream.split();
                    let req_tx = request_tx.clone();
                    let mut msg_rx = broadcast_tx.subscribe();
                    let disconnect_clone = Arc::clone(&disconnect);

                    tokio::spawn(async move {
                        loop {
                            if disconnect_clone.load(Ordering::SeqCst) {
                                break;
                            }

                            tokio::select! {
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(Message::Text(text))) => {
                                            drop(req_tx.send(text.to_string()));
                                        }
                                        Some(Ok(_)) => {}
                                        _ => break,
                                    }
                                }
                                msg = msg_rx.recv() => {
                                    match msg {
                                        Ok(text) => {
                                            if write.send(Message::Text(text.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                        Err(_) => break,
                                    }
                                }
                                () = sleep(Duration::from_millis(50)) => {
                                    if disconnect_clone.load(Ordering::SeqCst) {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
            });

            Self {
                addr,
                request_rx,
                message_tx,
                disconnect_signal,
            }
        }

        fn ws_url(&self) -> String {
            format!("ws://{}/v1/ws", self.addr)
        }

        fn disconnect_all(&self) {
            self.disconnect_signal.store(true, Ordering::SeqCst);
        }

        fn allow_reconnect(&self) {
            self.disconnect_signal.store(false, Ordering::SeqCst);
        }

        fn send(&self, message: &str) {
            drop(self.message_tx.send(message.to_owned()));
        }

        /// Next `subscribe` request, skipping anything else.
        async fn recv_subscribe(&mut self) -> Option<Value> {
            timeout(Duration::from_secs(3), async {
                loop {
                    let text = self.request_rx.recv().await?;
                    let request: Value = serde_json::from_str(&text).unwrap();
                    if request["method"] == json!("subscribe") {
                        return Some(request);
                    }
                }
            })
            .await
            .ok()
            .flatten()
        }
    }

    fn config() -> Config {
        Config::builder()
            .reconnect(
                ReconnectConfig::builder()
                    .max_retries(20)
                    .initial_backoff(Duration::from_millis(50))
                    .max_backoff(Duration::from_millis(200))
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn resubscribes_and_receives_updates_after_reconnect() {
        let mut mint = ReconnectableMockMint::start().await;
        let client = Client::new(&mint.ws_url(), config()).unwrap();

        let stream = client.subscribe_mint_quote("q1").unwrap();
        let mut stream = Box::pin(stream);

        let request = mint.recv_subscribe().await.unwrap();
        mint.send(&frames::ack(&request));
        mint.send(&frames::notification(&request, &json!({ "quote": "q1", "state": "UNPAID" })));
        let before = timeout(Duration::from_secs(2), stream.next()).await;
        assert!(before.is_ok(), "Should receive update before disconnect");

        mint.disconnect_all();
        sleep(Duration::from_millis(100)).await;
        mint.allow_reconnect();

        let resubscribe = mint.recv_subscribe().await.unwrap();
        assert_eq!(resubscribe["params"]["filters"], json!(["q1"]));
        assert_ne!(resubscribe["params"]["subId"], request["params"]["subId"]);

        mint.send(&frames::ack(&resubscribe));
        mint.send(&frames::notification(&resubscribe, &json!({ "quote": "q1", "state": "PAID" })));

        let after = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(after.state, MintQuoteState::Paid);
    }

    #[tokio::test]
    async fn subscribe_made_while_reconnecting_reaches_mint_once() {
        let addr = closed_port().await;
        let config = Config::builder().reconnect(fast_retries(50)).build();
        let client = Client::new(&format!("ws://{addr}/v1/ws"), config).unwrap();

        let mut state_rx = client.state_receiver();
        timeout(
            Duration::from_secs(2),
            state_rx.wait_for(|state| matches!(state, ConnectionState::Reconnecting { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        let kind = SubscriptionKind::Bolt11MintQuote;
        let listener_id = client
            .add_listener(kind, "q1", Listener::on_update(|_| {}))
            .unwrap();

        let mut mint = MockMint::start_on(addr).await;
        let mut received = Vec::new();
        let subscribe = mint.recv_subscribe(&mut received).await.unwrap();
        mint.send(&frames::ack(&subscribe));
        received.push(subscribe);

        eventually(|| client.registry().state(kind, "q1") == Some(SubscriptionState::Active)).await;
        client.remove_listener(kind, "q1", listener_id).unwrap();
        while let Some(request) = mint.recv_request().await {
            received.push(request);
        }

        let ids_with = |method: &str| -> Vec<Value> {
            received
                .iter()
                .filter(|frame| frame["method"] == json!(method))
                .map(|frame| frame["params"]["subId"].clone())
                .collect()
        };
        let subscribed = ids_with("subscribe");
        let unsubscribed = ids_with("unsubscribe");

        assert_eq!(subscribed.len(), 1, "{received:?}");
        assert!(
            subscribed.iter().all(|id| unsubscribed.contains(id)),
            "every subscribed id must be torn down: {received:?}"
        );
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn resubscribes_every_key_in_batches() {
        let mut mint = ReconnectableMockMint::start().await;
        let client = Client::new(&mint.ws_url(), config()).unwrap();

        let keys: Vec<String> = (0..12).map(|i| format!("q{i:02}")).collect();
        for key in &keys {
            client
                .add_listener(SubscriptionKind::Bolt11MintQuote, key, Listener::on_update(|_| {}))
                .unwrap();
            let request = mint.recv_subscribe().await.unwrap();
            mint.send(&frames::ack(&request));
        }

        mint.disconnect_all();
        sleep(Duration::from_millis(100)).await;
        mint.allow_reconnect();

        // A reconnect may be followed by further drops; keep the latest full round
        let mut covered: Vec<String> = Vec::new();
        while covered.len() < keys.len() {
            let request = mint.recv_subscribe().await.unwrap();
            let filters = request["params"]["filters"].as_array().unwrap();
            assert!(filters.len() <= 10);
            if filters.len() == 10 {
                covered.clear();
            }
            covered.extend(filters.iter().map(|f| f.as_str().unwrap().to_owned()));
        }

        covered.sort();
        assert_eq!(covered, keys);
    }
}
