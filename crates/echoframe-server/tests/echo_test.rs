//! End-to-end echo tests over real TCP sockets.
//!
//! Every test starts its own server on an ephemeral port and talks to it
//! with the echoframe client. A server that is not reachable fails the test.

use std::{
    cell::RefCell,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use echoframe_client::{Client, ClientError, Event};
use echoframe_core::{ConnectionConfig, EchoHandler, SystemEnv, Transport};
use echoframe_proto::{CloseCode, CloseInfo, Frame, Message, Opcode};
use echoframe_server::{ConnectionHandle, Server, ServerStats, SessionConfig, TcpTransport};
use proptest::prelude::*;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
    task::JoinHandle,
    time::timeout,
};

const LIMIT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<ServerStats>>,
}

impl TestServer {
    async fn stop(self) -> ServerStats {
        self.stop.send(true).unwrap();
        timeout(LIMIT, self.task).await.unwrap().unwrap().unwrap()
    }
}

async fn start(config: SessionConfig) -> TestServer {
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let (stop, rx) = watch::channel(false);
    let task = tokio::spawn(Server::echo(transport, SystemEnv::new(), config).run(rx));
    TestServer { addr, stop, task }
}

async fn start_default() -> TestServer {
    start(SessionConfig::default()).await
}

async fn connect(addr: SocketAddr) -> Client<TcpStream, SystemEnv> {
    let stream = TcpStream::connect(addr).await.unwrap();
    timeout(LIMIT, Client::connect(stream, &addr.to_string(), "/ws", SystemEnv::new()))
        .await
        .unwrap()
        .unwrap()
}

async fn recv(client: &mut Client<TcpStream, SystemEnv>) -> Event {
    timeout(LIMIT, client.recv()).await.unwrap().unwrap()
}

async fn echo(client: &mut Client<TcpStream, SystemEnv>, message: Message) -> Message {
    client.send(message).await.unwrap();
    timeout(LIMIT, client.recv_message()).await.unwrap().unwrap()
}

fn close_code(event: &Event) -> u16 {
    match event {
        Event::Close(Some(info)) => info.code().get(),
        other => panic!("expected close frame, got {other:?}"),
    }
}

async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    timeout(LIMIT, stream.read_to_string(&mut response)).await.unwrap().unwrap();
    response
}

#[tokio::test]
async fn hello_server_text() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let reply = echo(&mut client, Message::text("Hello, Server!")).await;
    assert_eq!(reply, Message::text("Hello, Server!"));
}

#[tokio::test]
async fn five_byte_binary() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let reply = echo(&mut client, Message::binary(vec![0x01u8, 0x02, 0x03, 0x04, 0x05])).await;
    assert_eq!(reply, Message::Binary(Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05])));
}

#[tokio::test]
async fn unicode_text() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let text = "こんにちは世界! 你好世界! 🌍🌎🌏";
    assert_eq!(echo(&mut client, Message::text(text)).await, Message::text(text));
}

#[tokio::test]
async fn empty_messages() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    assert_eq!(echo(&mut client, Message::text("")).await, Message::text(""));
    assert_eq!(echo(&mut client, Message::binary(Bytes::new())).await, Message::binary(Bytes::new()));
}

#[tokio::test]
async fn large_mixed_script_text() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let text = "aé中🌍Ж".repeat(1_000);
    assert!(text.len() >= 10_000);
    assert_eq!(echo(&mut client, Message::text(text.clone())).await, Message::text(text));
}

#[tokio::test]
async fn large_binary() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(echo(&mut client, Message::binary(data.clone())).await, Message::binary(data));
}

#[tokio::test]
async fn fragmented_message_echoed_whole() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let text = "fragmented 🌍 message ".repeat(20);
    client.send_fragmented(text.clone(), 7).await.unwrap();
    assert_eq!(recv(&mut client).await, Event::Message(Message::text(text)));
}

#[tokio::test]
async fn messages_echoed_in_order() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    for i in 0..50 {
        client.send(format!("message {i}")).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(recv(&mut client).await, Event::Message(Message::text(format!("message {i}"))));
    }
}

#[tokio::test]
async fn ping_answered_mid_fragmented_message() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let payload = vec![0xABu8; 125];
    client.send_frame(&Frame::new(Opcode::Text, false, "Hel")).await.unwrap();
    client.ping(payload.clone()).await.unwrap();
    client.send_frame(&Frame::continuation(true, "lo")).await.unwrap();

    assert_eq!(recv(&mut client).await, Event::Pong(Bytes::from(payload)));
    assert_eq!(recv(&mut client).await, Event::Message(Message::text("Hello")));
}

#[tokio::test]
async fn invalid_utf8_closes_with_1007() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    client.send_frame(&Frame::text(vec![0xC3u8, 0x28])).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1007);
}

#[tokio::test]
async fn invalid_utf8_in_reassembled_form_closes_with_1007() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    client.send_frame(&Frame::new(Opcode::Text, false, "valid so far ")).await.unwrap();
    client.send_frame(&Frame::continuation(true, vec![0xF0u8, 0x9F, 0x8C])).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1007);
}

#[tokio::test]
async fn oversized_frame_rejected_from_header() {
    let config = SessionConfig {
        connection: ConnectionConfig { max_frame_size: 1024, ..Default::default() },
        ..Default::default()
    };
    let server = start(config).await;
    let mut client = connect(server.addr).await;

    // Header alone declares 1 GiB; no payload is ever sent.
    let mut header = vec![0x82u8, 0x80 | 127];
    header.extend_from_slice(&(1u64 << 30).to_be_bytes());
    header.extend_from_slice(&[1, 2, 3, 4]);
    client.send_raw(&header).await.unwrap();

    assert_eq!(close_code(&recv(&mut client).await), 1009);
}

#[tokio::test]
async fn unmasked_frame_closes_with_1002() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    client.send_raw(&[0x81, 0x02, b'h', b'i']).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1002);
}

#[tokio::test]
async fn reserved_opcode_closes_with_1002() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    client.send_raw(&[0x83, 0x80, 0, 0, 0, 0]).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1002);
}

#[tokio::test]
async fn unexpected_continuation_closes_with_1002() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    client.send_frame(&Frame::continuation(true, "orphan")).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1002);
}

#[tokio::test]
async fn client_close_acknowledged_then_transport_shut_down() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let bye = CloseInfo::new(CloseCode::NORMAL, "bye").unwrap();
    let reply = timeout(LIMIT, client.close(Some(&bye))).await.unwrap().unwrap();
    assert_eq!(reply.map(|info| info.code()), Some(CloseCode::NORMAL));

    timeout(LIMIT, client.wait_for_eof()).await.unwrap().unwrap();

    let stats = server.stop().await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.clean_closes, 1);
}

#[tokio::test]
async fn close_without_code_answered_with_1000() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;

    let reply = timeout(LIMIT, client.close(None)).await.unwrap().unwrap();
    assert_eq!(reply, Some(CloseInfo::normal()));
}

#[tokio::test]
async fn concurrent_connections_do_not_interleave() {
    let server = start_default().await;
    let addr = server.addr;

    let clients: Vec<_> = (0..16)
        .map(|id| {
            tokio::spawn(async move {
                let mut client = connect(addr).await;
                for n in 0..25 {
                    let text = format!("client {id} message {n} 🌍");
                    assert_eq!(echo(&mut client, Message::text(text.clone())).await, Message::text(text));

                    let data = vec![id as u8; 100 + n];
                    assert_eq!(echo(&mut client, Message::binary(data.clone())).await, Message::binary(data));
                }
                client.close(Some(&CloseInfo::normal())).await.unwrap();
            })
        })
        .collect();

    for client in clients {
        timeout(LIMIT, client).await.unwrap().unwrap();
    }

    let stats = server.stop().await;
    assert_eq!(stats.accepted, 16);
    assert_eq!(stats.clean_closes, 16);
}

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let server = start_default().await;
    let mut client = connect(server.addr).await;
    assert_eq!(echo(&mut client, Message::text("before")).await, Message::text("before"));

    server.stop.send(true).unwrap();
    let event = recv(&mut client).await;
    assert_eq!(close_code(&event), 1001);
    if let Event::Close(info) = event {
        client.send_frame(&Frame::close(info.as_ref())).await.unwrap();
    }

    let stats = timeout(LIMIT, server.task).await.unwrap().unwrap().unwrap();
    assert_eq!(stats.clean_closes, 1);
}

#[tokio::test]
async fn unanswered_server_close_times_out() {
    let handles = Arc::new(Mutex::new(Vec::<ConnectionHandle>::new()));
    let registry = Arc::clone(&handles);

    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let config = SessionConfig {
        connection: ConnectionConfig {
            close_timeout: Duration::from_millis(200),
            ..Default::default()
        },
        ..Default::default()
    };
    let server = Server::new(transport, SystemEnv::new(), config, move |handle: &ConnectionHandle| {
        registry.lock().unwrap().push(handle.clone());
        EchoHandler
    });
    let (_stop, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));

    let mut client = connect(addr).await;
    let handle = handles.lock().unwrap()[0].clone();

    handle.send("pushed by host").await.unwrap();
    assert_eq!(recv(&mut client).await, Event::Message(Message::text("pushed by host")));

    handle.close(CloseInfo::new(CloseCode::NORMAL, "done").unwrap()).await.unwrap();
    assert_eq!(close_code(&recv(&mut client).await), 1000);

    // Never answer; the server gives up and drops the transport.
    let started = tokio::time::Instant::now();
    timeout(LIMIT, client.wait_for_eof()).await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The session is gone; further commands are refused.
    timeout(LIMIT, async {
        while !handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(handle.send("too late").await.is_err());
}

#[tokio::test]
async fn heartbeat_pings_client() {
    let config = SessionConfig {
        connection: ConnectionConfig {
            heartbeat_interval: Some(Duration::from_millis(50)),
            ..Default::default()
        },
        ..Default::default()
    };
    let server = start(config).await;
    let mut client = connect(server.addr).await;
    assert_eq!(recv(&mut client).await, Event::Ping(Bytes::new()));
}

#[tokio::test]
async fn idle_connection_closed_with_going_away() {
    let config = SessionConfig {
        connection: ConnectionConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
        ..Default::default()
    };
    let server = start(config).await;
    let mut client = connect(server.addr).await;
    assert_eq!(close_code(&recv(&mut client).await), 1001);
}

#[tokio::test]
async fn missing_key_rejected_with_400() {
    let server = start_default().await;
    let response = raw_exchange(
        server.addr,
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
}

#[tokio::test]
async fn wrong_version_rejected_with_426() {
    let server = start_default().await;
    let response = raw_exchange(
        server.addr,
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"), "{response}");
    assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
}

#[tokio::test]
async fn wrong_path_rejected_with_404() {
    let config = SessionConfig {
        connection: ConnectionConfig { upgrade_path: Some("/ws".into()), ..Default::default() },
        ..Default::default()
    };
    let server = start(config).await;

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let result = Client::connect(stream, "localhost", "/elsewhere", SystemEnv::new()).await;
    assert!(matches!(
        result,
        Err(ClientError::Handshake(echoframe_core::HandshakeError::UnexpectedStatus(404)))
    ));
}

#[tokio::test]
async fn failed_connection_does_not_affect_others() {
    let server = start_default().await;
    let mut healthy = connect(server.addr).await;
    let mut broken = connect(server.addr).await;

    broken.send_raw(&[0x81, 0x01, b'x']).await.unwrap();
    assert_eq!(close_code(&recv(&mut broken).await), 1002);

    assert_eq!(echo(&mut healthy, Message::text("still here")).await, Message::text("still here"));
}

#[test]
fn text_roundtrip_property() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(start_default());
    let client = RefCell::new(rt.block_on(connect(server.addr)));

    proptest!(ProptestConfig::with_cases(64), |(text in "\\PC{0,3000}")| {
        let reply = rt.block_on(echo(&mut client.borrow_mut(), Message::text(text.clone())));
        prop_assert_eq!(reply, Message::text(text));
    });
}

#[test]
fn binary_roundtrip_property() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(start_default());
    let client = RefCell::new(rt.block_on(connect(server.addr)));

    proptest!(
        ProptestConfig::with_cases(64),
        |(data in proptest::collection::vec(any::<u8>(), 0..70_000), max_fragment in 0usize..4096)| {
            let mut client = client.borrow_mut();
            rt.block_on(client.send_fragmented(data.clone(), max_fragment)).unwrap();
            let reply = rt.block_on(client.recv_message()).unwrap();
            prop_assert_eq!(reply, Message::binary(data));
        }
    );
}
