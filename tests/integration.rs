//! Integration tests for ola-client.
//!
//! Each test runs a scripted fake daemon on an ephemeral localhost port and
//! drives the public client API against it.

use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use ola_client::codec::ProtoCodec;
use ola_client::messages::{
    Ack, DmxData, MergeMode, OptionalUniverseRequest, UniverseInfo, UniverseInfoReply,
    UniverseRequest, GET_DMX, GET_UNIVERSE_INFO,
};
use ola_client::protocol::{
    build_frame, encode_frame, header_to_bytes, read_frame, MessageType, RpcMessage,
};
use ola_client::{
    with_failure, Client, ClientBuilder, ClientConfig, FailureRouting, OlaError, RequestFailure,
};

const WAIT: Duration = Duration::from_secs(2);

async fn daemon() -> (TcpListener, ClientBuilder) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let builder = Client::builder().host("127.0.0.1").port(port);
    (listener, builder)
}

async fn next_request(socket: &mut TcpStream) -> RpcMessage {
    let envelope = timeout(WAIT, read_frame(socket))
        .await
        .expect("request within deadline")
        .unwrap()
        .envelope()
        .unwrap();
    assert_eq!(envelope.message_type(), Some(MessageType::Request));
    envelope
}

async fn send(socket: &mut TcpStream, envelope: &RpcMessage) {
    socket.write_all(&encode_frame(envelope).unwrap()).await.unwrap();
}

async fn reply<M: Message>(socket: &mut TcpStream, id: u32, message: &M) {
    send(socket, &RpcMessage::response(id, ProtoCodec::encode(message))).await;
}

fn dmx(universe: i32) -> DmxData {
    DmxData {
        universe,
        data: Bytes::from(vec![universe as u8; 4]),
        priority: None,
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", WAIT);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A response reaches the handler shortly after the daemon sends it.
#[tokio::test]
async fn test_get_universe_info_roundtrip() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .get_universe_info(None, move |reply: UniverseInfoReply| {
            tx.send(reply).unwrap();
        })
        .unwrap();

    let request = next_request(&mut server).await;
    assert_eq!(request.name.as_deref(), Some(GET_UNIVERSE_INFO));
    let body: OptionalUniverseRequest = ProtoCodec::decode(request.payload()).unwrap();
    assert_eq!(body.universe, None);

    let info = UniverseInfoReply {
        universe: vec![UniverseInfo {
            universe: 1,
            name: "Stage left".to_string(),
            merge_mode: MergeMode::Htp as i32,
            input_port_count: 0,
            output_port_count: 1,
            rdm_devices: 0,
        }],
    };
    reply(&mut server, request.correlation_id(), &info).await;
    let sent_at = Instant::now();

    let received = timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("handler within 200ms")
        .unwrap();
    assert!(sent_at.elapsed() < Duration::from_millis(200));
    assert_eq!(received, info);
    assert_eq!(client.pending_requests(), 0);

    client.shutdown().await;
}

/// Responses are matched by id, not by arrival order.
#[tokio::test]
async fn test_out_of_order_responses_are_correlated() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for universe in [1, 2, 3] {
        let tx = tx.clone();
        client
            .get_dmx(universe, move |reply: DmxData| {
                tx.send((universe, reply.universe)).unwrap();
            })
            .unwrap();
    }

    let mut ids = Vec::new();
    for _ in 0..3 {
        let request = next_request(&mut server).await;
        let body: UniverseRequest = ProtoCodec::decode(request.payload()).unwrap();
        ids.push((request.correlation_id(), body.universe));
    }

    // Answer C, A, B.
    for index in [2, 0, 1] {
        let (id, universe) = ids[index];
        reply(&mut server, id, &dmx(universe)).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (asked, answered) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(asked, answered);
        seen.push(asked);
    }
    seen.sort();
    assert_eq!(seen, vec![1, 2, 3]);

    client.shutdown().await;
}

/// Requests from one submitter reach the wire in submission order, with
/// fresh ids, even while other tasks submit concurrently.
#[tokio::test]
async fn test_concurrent_submitters_keep_fifo_order() {
    const TASKS: i32 = 4;
    const PER_TASK: i32 = 25;

    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let mut submitters = Vec::new();
    for task in 0..TASKS {
        let client = client.clone();
        submitters.push(tokio::spawn(async move {
            for seq in 0..PER_TASK {
                client.get_dmx(task * 1000 + seq, |_: DmxData| {}).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }

    let mut last_seq = vec![-1; TASKS as usize];
    let mut last_id = 0;
    for _ in 0..TASKS * PER_TASK {
        let request = next_request(&mut server).await;
        assert!(request.correlation_id() > last_id);
        last_id = request.correlation_id();

        let body: UniverseRequest = ProtoCodec::decode(request.payload()).unwrap();
        let (task, seq) = ((body.universe / 1000) as usize, body.universe % 1000);
        assert!(seq > last_seq[task], "task {} out of order", task);
        last_seq[task] = seq;
    }
    assert!(last_seq.iter().all(|&seq| seq == PER_TASK - 1));
    assert_eq!(client.pending_requests(), (TASKS * PER_TASK) as usize);

    client.shutdown().await;
}

/// Unanswered requests expire, and a late response for one is dropped.
#[tokio::test]
async fn test_unanswered_requests_expire() {
    let (listener, builder) = daemon().await;
    let client = builder
        .pending_ttl(Duration::from_millis(50))
        .sweep_interval(Duration::from_millis(20))
        .start()
        .await
        .unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for universe in 0..5 {
        let tx = tx.clone();
        client
            .get_dmx(universe, move |reply: DmxData| {
                tx.send(reply.universe).unwrap();
            })
            .unwrap();
    }
    drop(tx);

    let mut first_id = 0;
    for n in 0..5 {
        let request = next_request(&mut server).await;
        if n == 0 {
            first_id = request.correlation_id();
        }
    }
    assert_eq!(client.pending_requests(), 5);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.pending_requests(), 0);

    reply(&mut server, first_id, &dmx(0)).await;
    // All handlers were dropped with their entries, so the channel closes
    // without a value.
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
    assert!(!client.is_shut_down());

    client.shutdown().await;
}

/// The client reconnects after the daemon drops the connection and keeps
/// serving requests.
#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();

    let (server, _) = listener.accept().await.unwrap();
    drop(server);

    let (mut server, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client reconnects")
        .unwrap();

    let reply_value: DmxData = {
        let call = client.call(GET_DMX, &UniverseRequest { universe: 7 });
        let answer = async {
            let request = next_request(&mut server).await;
            reply(&mut server, request.correlation_id(), &dmx(7)).await;
        };
        let (result, ()) = tokio::join!(call, answer);
        result.unwrap()
    };
    assert_eq!(reply_value.universe, 7);
    assert!(!client.is_shut_down());
    assert!(client.is_connected());

    client.shutdown().await;
}

/// When the reconnect fails too, the client shuts itself down and keeps the
/// unanswered request until its TTL runs out.
#[tokio::test]
async fn test_failed_reconnect_shuts_client_down() {
    let (listener, builder) = daemon().await;
    let client = builder
        .connect_timeout(Duration::from_millis(200))
        .start()
        .await
        .unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    client.get_dmx(1, |_: DmxData| {}).unwrap();
    next_request(&mut server).await;

    drop(listener);
    drop(server);

    eventually(|| client.is_shut_down()).await;

    let failure = client.last_failure().unwrap();
    assert!(failure.description.contains("Lost connection"));
    assert!(matches!(
        client.get_dmx(2, |_: DmxData| {}),
        Err(OlaError::ClientShutdown)
    ));
    assert_eq!(client.pending_requests(), 1);
    assert!(!client.is_connected());
}

/// By default RESPONSE_FAILED only updates the failure status.
#[tokio::test]
async fn test_response_failed_updates_status() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    client
        .get_dmx(9, |_: DmxData| panic!("rejected request must not succeed"))
        .unwrap();
    let request = next_request(&mut server).await;
    send(
        &mut server,
        &RpcMessage::response_failed(request.correlation_id(), "Universe 9 doesn't exist"),
    )
    .await;

    eventually(|| client.last_failure().is_some()).await;
    let failure = client.last_failure().unwrap();
    assert!(failure.description.contains("rejected"));
    assert_eq!(failure.cause.as_deref(), Some("Universe 9 doesn't exist"));
    assert_eq!(client.pending_requests(), 1);

    client.shutdown().await;
}

/// With handler routing, RESPONSE_FAILED reaches the caller.
#[tokio::test]
async fn test_response_failed_routed_to_handler() {
    let (listener, builder) = daemon().await;
    let client = builder
        .failure_routing(FailureRouting::Handler)
        .start()
        .await
        .unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .get_dmx(
            9,
            with_failure(
                |_: DmxData| panic!("rejected request must not succeed"),
                move |failure| tx.send(failure).unwrap(),
            ),
        )
        .unwrap();
    let request = next_request(&mut server).await;
    let id = request.correlation_id();
    send(&mut server, &RpcMessage::response_failed(id, "no such universe")).await;

    let failure = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        failure,
        RequestFailure::Rejected {
            id,
            reason: "no such universe".to_string()
        }
    );
    assert_eq!(client.pending_requests(), 0);

    let call = client.call::<_, DmxData>(GET_DMX, &UniverseRequest { universe: 9 });
    let answer = async {
        let request = next_request(&mut server).await;
        send(
            &mut server,
            &RpcMessage::response_failed(request.correlation_id(), "still no"),
        )
        .await;
    };
    let (result, ()) = tokio::join!(call, answer);
    assert!(matches!(result, Err(OlaError::Rejected { .. })));

    client.shutdown().await;
}

/// Unknown envelope types and responses nobody waits for are skipped.
#[tokio::test]
async fn test_unexpected_messages_are_ignored() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let call = client.call::<_, DmxData>(GET_DMX, &UniverseRequest { universe: 3 });
    let answer = async {
        let request = next_request(&mut server).await;
        send(
            &mut server,
            &RpcMessage {
                kind: MessageType::DescriptorResponse as i32,
                id: Some(request.correlation_id()),
                name: None,
                buffer: None,
            },
        )
        .await;
        send(
            &mut server,
            &RpcMessage {
                kind: 42,
                id: None,
                name: None,
                buffer: None,
            },
        )
        .await;
        reply(&mut server, 999, &dmx(99)).await;
        reply(&mut server, request.correlation_id(), &dmx(3)).await;
    };

    let (result, ()) = tokio::join!(call, answer);
    assert_eq!(result.unwrap().universe, 3);
    assert!(client.last_failure().is_none());
    assert!(!client.is_shut_down());

    client.shutdown().await;
}

/// A response that does not decode reaches the failure callback and the
/// failure status without disturbing the connection.
#[tokio::test]
async fn test_malformed_response_is_reported() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client
        .get_dmx(
            4,
            with_failure(|_: DmxData| {}, move |failure| tx.send(failure).unwrap()),
        )
        .unwrap();
    let request = next_request(&mut server).await;
    send(
        &mut server,
        &RpcMessage::response(request.correlation_id(), Bytes::from_static(&[0xFF])),
    )
    .await;

    let failure = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(failure, RequestFailure::Malformed { .. }));
    eventually(|| client.last_failure().is_some()).await;
    assert!(client
        .last_failure()
        .unwrap()
        .description
        .contains("Malformed response"));
    assert!(!client.is_shut_down());

    client.shutdown().await;
}

/// An awaited request that expires resolves as abandoned.
#[tokio::test]
async fn test_call_abandoned_after_ttl() {
    let (listener, builder) = daemon().await;
    let client = builder
        .pending_ttl(Duration::from_millis(50))
        .sweep_interval(Duration::from_millis(20))
        .build();

    let call = client.call::<_, DmxData>(GET_DMX, &UniverseRequest { universe: 1 });
    let silent = async {
        let (mut server, _) = listener.accept().await.unwrap();
        next_request(&mut server).await;
        server
    };

    let (result, _server) = tokio::join!(timeout(WAIT, call), silent);
    assert!(matches!(result.unwrap(), Err(OlaError::RequestAbandoned)));

    client.shutdown().await;
}

/// Shutdown writes everything already queued, then closes the connection.
#[tokio::test]
async fn test_shutdown_drains_queue() {
    let (listener, builder) = daemon().await;
    let client = builder.build();

    for universe in 0..3 {
        client.get_dmx(universe, |_: DmxData| {}).unwrap();
    }
    client.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();
    client.shutdown().await;

    for universe in 0..3 {
        let request = next_request(&mut server).await;
        let body: UniverseRequest = ProtoCodec::decode(request.payload()).unwrap();
        assert_eq!(body.universe, universe);
    }
    assert!(read_frame(&mut server).await.is_err());

    assert!(client.is_shut_down());
    assert_eq!(client.pending_requests(), 0);
    assert!(matches!(client.start().await, Err(OlaError::ClientShutdown)));
}

/// Answer one GetDmx call on `server` while `client` waits for it.
async fn answer_get_dmx(client: &Client, server: &mut TcpStream, universe: i32) -> DmxData {
    let request_body = UniverseRequest { universe };
    let call = client.call(GET_DMX, &request_body);
    let answer = async {
        let request = next_request(server).await;
        reply(server, request.correlation_id(), &dmx(universe)).await;
    };
    let (result, ()) = tokio::join!(call, answer);
    result.unwrap()
}

/// A frame with an unsupported protocol version makes the client drop the
/// connection and reconnect.
#[tokio::test]
async fn test_bad_header_version_reconnects() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    server.write_all(&header_to_bytes((2 << 28) | 3)).await.unwrap();
    server.write_all(b"abc").await.unwrap();

    let (mut server, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client reconnects")
        .unwrap();
    assert!(!client.is_shut_down());
    assert_eq!(answer_get_dmx(&client, &mut server, 5).await.universe, 5);

    client.shutdown().await;
}

/// A frame whose body is not an envelope makes the client reconnect.
#[tokio::test]
async fn test_undecodable_envelope_reconnects() {
    let (listener, builder) = daemon().await;
    let client = builder.start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();

    server.write_all(&build_frame(&[0xFF, 0xFF]).unwrap()).await.unwrap();

    let (mut server, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client reconnects")
        .unwrap();
    assert!(!client.is_shut_down());
    assert_eq!(answer_get_dmx(&client, &mut server, 6).await.universe, 6);

    client.shutdown().await;
}

/// A zero sweep interval from a config file does not stop the client.
#[tokio::test]
async fn test_zero_sweep_interval_from_config() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ClientConfig::from_json_str(&format!(
        r#"{{ "host": "127.0.0.1", "port": {}, "sweep_interval": 0 }}"#,
        port
    ))
    .unwrap();

    let client = Client::builder().config(config).start().await.unwrap();
    let (mut server, _) = listener.accept().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(answer_get_dmx(&client, &mut server, 2).await.universe, 2);
    assert!(!client.is_shut_down());
    assert!(client.last_failure().is_none());

    client.shutdown().await;
}

/// A daemon that stops reading holds up neither status queries nor
/// shutdown.
#[tokio::test]
async fn test_shutdown_with_stalled_daemon() {
    let (listener, builder) = daemon().await;
    let client = builder
        .shutdown_timeout(Duration::from_millis(200))
        .start()
        .await
        .unwrap();
    // Accepted but never read from.
    let (_server, _) = listener.accept().await.unwrap();

    for _ in 0..64 {
        client
            .update_dmx_data(1, vec![0u8; 1024 * 1024], |_: Ack| {})
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(client.is_connected());
    timeout(Duration::from_secs(3), client.shutdown())
        .await
        .expect("shutdown returns despite the stalled write");
    assert!(!client.is_connected());
    assert!(client.is_shut_down());
    assert_eq!(client.pending_requests(), 0);
}
