//! End-to-end behavior against a real WebSocket peer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use common::{MockServer, within};
use orchflow_client::actions::{PANE_OUTPUT, PaneType};
use orchflow_client::{
    Action, ClientConfig, ClientError, ConnectionState, ErrorCode, Event, HandlerError,
    ListenerExit, OrchflowClient,
};

async fn connected() -> (MockServer, OrchflowClient) {
    let server = MockServer::start().await;
    let client = within(OrchflowClient::connect(&server.url)).await.unwrap();
    (server, client)
}

fn reply(request: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

#[tokio::test]
async fn call_round_trip() {
    let (mut server, client) = connected().await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let (result, ()) = tokio::join!(client.call("ping", json!({})), async {
        let req = server.next_request().await;
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["method"], "ping");
        assert_eq!(req["id"], 1);
        server.send(&reply(&req, json!("pong")));
    });
    assert_eq!(result.unwrap(), json!("pong"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn responses_are_matched_by_id_not_order() {
    let (mut server, client) = connected().await;

    let (first, second, ()) = tokio::join!(
        client.call("execute", json!({"n": 1})),
        client.call("execute", json!({"n": 2})),
        async {
            let a = server.next_request().await;
            let b = server.next_request().await;
            // Answer the later request first.
            let (early, late) = if a["id"] == 2 { (a, b) } else { (b, a) };
            server.send(&reply(&early, json!({"echo": early["params"]["n"]})));
            server.send(&reply(&late, json!({"echo": late["params"]["n"]})));
        }
    );
    assert_eq!(first.unwrap(), json!({"echo": 1}));
    assert_eq!(second.unwrap(), json!({"echo": 2}));
}

#[tokio::test]
async fn ids_increase_across_calls() {
    let (mut server, client) = connected().await;
    let mut seen = Vec::new();
    for _ in 0..3 {
        let (result, ()) = tokio::join!(client.call("ping", json!({})), async {
            let req = server.next_request().await;
            seen.push(req["id"].as_u64().unwrap());
            server.send(&reply(&req, Value::Null));
        });
        assert!(result.is_ok());
    }
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn error_response_becomes_rpc_error() {
    let (mut server, client) = connected().await;

    let (result, ()) = tokio::join!(client.call("nope", json!({})), async {
        let req = server.next_request().await;
        server.send(&json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": -32601, "message": "Method not found: nope"}
        }));
    });
    assert_matches!(result, Err(ClientError::Rpc(e)) => {
        assert_eq!(e.code, ErrorCode::Numeric(-32601));
        assert!(e.is_method_not_found());
        assert_eq!(e.message, "Method not found: nope");
    });
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn execute_wraps_action() {
    let (mut server, client) = connected().await;
    let action = Action::CreatePane {
        session_id: "s1".into(),
        pane_type: PaneType::Terminal,
        command: Some("bash".into()),
        name: None,
    };

    let (result, ()) = tokio::join!(client.execute(&action), async {
        let req = server.next_request().await;
        assert_eq!(req["method"], "execute");
        assert_eq!(
            req["params"]["action"],
            json!({"type": "create_pane", "session_id": "s1", "pane_type": "terminal", "command": "bash"})
        );
        server.send(&reply(&req, json!({"id": "p1"})));
    });
    assert_eq!(result.unwrap()["id"], "p1");
}

#[tokio::test]
async fn connection_loss_fails_outstanding_calls() {
    let (mut server, client) = connected().await;
    let client = Arc::new(client);

    let mut calls = Vec::new();
    for n in 0..5 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            client.call("execute", json!({ "n": n })).await
        }));
    }
    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(server.next_request().await);
    }
    for req in requests.iter().filter(|r| r["id"] == 1 || r["id"] == 2) {
        server.send(&reply(req, json!("done")));
    }

    // Wait until only ids 3, 4, 5 remain.
    within(async {
        while client.pending_calls() > 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    server.drop_connection();

    let mut done = 0;
    let mut closed = 0;
    for call in calls {
        match within(call).await.unwrap() {
            Ok(_) => done += 1,
            Err(ClientError::ConnectionClosed { .. }) => closed += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((done, closed), (2, 3));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(client.pending_calls(), 0);

    assert_matches!(
        client.call("ping", json!({})).await,
        Err(ClientError::ConnectionClosed { .. })
    );
}

#[tokio::test]
async fn remote_close_is_terminal() {
    let (server, client) = connected().await;
    server.close();
    let exit = within(client.closed()).await;
    assert!(exit.is_some());
    assert_eq!(client.state(), ConnectionState::Failed);
    assert!(client.call("ping", json!({})).await.unwrap_err().is_terminal());
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_loop() {
    let (mut server, client) = connected().await;

    let (result, ()) = tokio::join!(client.call("ping", json!({})), async {
        let req = server.next_request().await;
        server.send_raw("this is not json");
        server.send(&json!({"neither": "id nor event"}));
        server.send(&json!({"id": 4242, "result": "stray"}));
        server.send(&reply(&req, json!("still alive")));
    });
    assert_eq!(result.unwrap(), json!("still alive"));
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn subscribe_then_receive_events() {
    let (mut server, client) = connected().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let _ = client.on_event(PANE_OUTPUT, move |ev: Event| {
        let _ = tx.send(ev);
        async { Ok::<(), HandlerError>(()) }
    });

    client.subscribe([PANE_OUTPUT]).await.unwrap();
    let sub = server.next_request().await;
    assert_eq!(sub["method"], "subscribe");
    assert_eq!(sub["params"]["events"], json!(["pane_output"]));
    assert!(sub.get("id").is_none());

    // An event type nobody handles is a silent no-op.
    server.send(&json!({"event": {"type": "file_saved", "path": "a.rs"}}));
    server.send(&json!({"event": {"type": "pane_output", "pane_id": "p1", "data": "FAIL: test_x"}}));

    let ev = within(rx.recv()).await.unwrap();
    assert_eq!(ev.event_type, PANE_OUTPUT);
    assert_eq!(ev.str_field("data"), Some("FAIL: test_x"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn handlers_run_in_order_and_failures_are_isolated() {
    let (server, client) = connected().await;
    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

    let log = order.clone();
    let _ = client.on_event("X", move |_ev: Event| {
        log.lock().push("h1");
        async { Ok::<(), HandlerError>(()) }
    });
    let log = order.clone();
    let _ = client.on_event("X", move |_ev: Event| {
        log.lock().push("h2");
        async { Err::<(), HandlerError>(HandlerError::failed("h2 broke")) }
    });
    let log = order.clone();
    let _ = client.on_event("X", move |_ev: Event| {
        log.lock().push("h3");
        let done = done_tx.clone();
        async move {
            let _ = done.send(());
            Ok::<(), HandlerError>(())
        }
    });

    server.send(&json!({"event": {"type": "X"}}));
    within(done_rx.recv()).await.unwrap();
    assert_eq!(*order.lock(), vec!["h1", "h2", "h3"]);

    // The loop survived and keeps dispatching.
    server.send(&json!({"event": {"type": "X"}}));
    within(done_rx.recv()).await.unwrap();
    assert_eq!(order.lock().len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_handler_does_not_delay_responses() {
    let (mut server, client) = connected().await;
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let _ = client.on_event("X", move |_ev: Event| {
        // Holds its thread before returning a future.
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        async { Ok::<(), HandlerError>(()) }
    });

    let (result, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(1), client.call("ping", json!({}))),
        async {
            let req = server.next_request().await;
            server.send(&json!({"event": {"type": "X"}}));
            server.send(&reply(&req, json!("pong")));
        }
    );
    let _ = release_tx.send(());
    assert_eq!(result.expect("response was held up by a handler").unwrap(), json!("pong"));
}

#[tokio::test]
async fn removed_handler_is_not_called() {
    let (server, client) = connected().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();

    let first_tx = tx.clone();
    let first = client.on_event("X", move |_ev: Event| {
        let _ = first_tx.send("first");
        async { Ok::<(), HandlerError>(()) }
    });
    let _ = client.on_event("X", move |_ev: Event| {
        let _ = tx.send("second");
        async { Ok::<(), HandlerError>(()) }
    });
    assert!(client.remove_handler(first));

    server.send(&json!({"event": {"type": "X"}}));
    assert_eq!(within(rx.recv()).await, Some("second"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn call_deadline_withdraws_the_call() {
    let (mut server, client) = connected().await;

    let err = client
        .call_with_timeout("slow", json!({}), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_matches!(err, ClientError::Timeout { ref method, id: 1, timeout_ms: 50 } if method == "slow");
    assert_eq!(client.pending_calls(), 0);

    // The late answer is discarded and the connection stays usable.
    let req = server.next_request().await;
    server.send(&reply(&req, json!("too late")));
    let (result, ()) = tokio::join!(client.call("ping", json!({})), async {
        let req = server.next_request().await;
        assert_eq!(req["id"], 2);
        server.send(&reply(&req, json!("pong")));
    });
    assert_eq!(result.unwrap(), json!("pong"));
}

#[tokio::test]
async fn abandoned_calls_are_withdrawn() {
    let (mut server, client) = connected().await;
    for _ in 0..3 {
        let waited = tokio::time::timeout(Duration::from_millis(20), client.call("slow", json!({}))).await;
        assert!(waited.is_err());
    }
    assert_eq!(client.pending_calls(), 0);

    // Late answers are discarded; the connection keeps working.
    for _ in 0..3 {
        let req = server.next_request().await;
        server.send(&reply(&req, json!("too late")));
    }
    let (result, ()) = tokio::join!(client.call("ping", json!({})), async {
        let req = server.next_request().await;
        assert_eq!(req["id"], 4);
        server.send(&reply(&req, json!("pong")));
    });
    assert_eq!(result.unwrap(), json!("pong"));
}

#[tokio::test]
async fn configured_deadline_applies_to_call() {
    let server = MockServer::start().await;
    let config = ClientConfig {
        call_timeout_ms: Some(50),
        ..ClientConfig::with_url(&server.url)
    };
    let client = within(OrchflowClient::connect_with(config)).await.unwrap();
    assert_matches!(
        client.call("slow", json!({})).await,
        Err(ClientError::Timeout { .. })
    );
}

#[tokio::test]
async fn close_fails_pending_and_is_idempotent() {
    let (mut server, client) = connected().await;
    let client = Arc::new(client);

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.call("slow", json!({})).await });
    let _ = server.next_request().await;

    client.close().await;
    client.close().await;

    assert_matches!(
        within(call).await.unwrap(),
        Err(ClientError::ConnectionClosed { reason: Some(r) }) if r == "closed by client"
    );
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_matches!(
        client.call("ping", json!({})).await,
        Err(ClientError::ConnectionClosed { .. })
    );
}

#[tokio::test]
async fn abandoned_wait_for_close_still_lets_close_join() {
    let (_server, client) = connected().await;
    assert!(
        tokio::time::timeout(Duration::from_millis(20), client.closed())
            .await
            .is_err()
    );

    within(client.close()).await;
    assert_eq!(
        within(client.closed()).await,
        Some(ListenerExit::Cancelled { by_client: true })
    );
    // Every later wait sees the same outcome.
    assert_eq!(
        within(client.closed()).await,
        Some(ListenerExit::Cancelled { by_client: true })
    );
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connection_error() {
    let addr = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let result = OrchflowClient::connect(&format!("ws://{addr}")).await;
    assert_matches!(result, Err(ClientError::Connection { .. }));
}
