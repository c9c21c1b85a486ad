//! End-to-end relay tests over real TCP sockets.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use audsync_relay_engine::{RelayConfig, RelayServer};
use audsync_wire_core::framing::{read_message, write_message};
use audsync_wire_core::{Message, MessageKind, StreamConfig};

const TEST_CONFIG: StreamConfig = StreamConfig {
    sample_rate: 44_100,
    channels: 1,
    frames_per_buffer: 256,
};

async fn start_relay() -> RelayServer {
    let config = RelayConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        outbound_queue: 256,
    };
    RelayServer::bind(config).await.expect("relay bind")
}

/// Connect a client and run the full CONNECT/CONFIG/CLIENT_READY
/// handshake.
async fn ready_client(server: &RelayServer) -> TcpStream {
    let mut stream = TcpStream::connect(server.local_addr()).await.expect("connect");
    stream.set_nodelay(true).unwrap();
    write_message(&mut stream, &Message::connect(0)).await.unwrap();
    write_message(&mut stream, &Message::config(0, &TEST_CONFIG))
        .await
        .unwrap();
    write_message(&mut stream, &Message::client_ready(0)).await.unwrap();
    stream
}

async fn wait_for_clients(server: &RelayServer, count: usize) {
    for _ in 0..200 {
        if server.connected_clients() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} clients, relay has {}",
        server.connected_clients()
    );
}

/// Wait until every connected client has progressed to Ready.
async fn wait_for_ready(server: &RelayServer, count: usize) {
    use audsync_relay_engine::ClientPhase;
    for _ in 0..200 {
        let snapshot = server.snapshot();
        if snapshot.len() == count && snapshot.iter().all(|c| c.phase == ClientPhase::Ready) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("clients never became ready: {:?}", server.snapshot());
}

async fn assert_no_message(stream: &mut TcpStream) {
    let result = timeout(Duration::from_millis(150), read_message(stream)).await;
    assert!(
        result.is_err(),
        "expected silence, got {:?}",
        result.unwrap()
    );
}

#[tokio::test]
async fn single_client_audio_goes_nowhere() {
    let server = start_relay().await;
    let mut client = ready_client(&server).await;
    wait_for_ready(&server, 1).await;

    for seq in 1u32..=10 {
        let msg = Message::audio(seq, seq as u64, &[0.1f32; 256]);
        write_message(&mut client, &msg).await.unwrap();
    }

    // With no peers, nothing comes back; the sender never hears itself.
    assert_no_message(&mut client).await;
    assert_eq!(server.connected_clients(), 1);
    assert_eq!(server.stats().frames_forwarded, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn two_clients_happy_path_preserves_order_and_bytes() {
    let server = start_relay().await;
    let mut sender = ready_client(&server).await;
    let mut receiver = ready_client(&server).await;
    wait_for_ready(&server, 2).await;

    let mut sent = Vec::new();
    for seq in 1u32..=100 {
        let samples: Vec<f32> = (0..256).map(|i| ((seq + i) as f32).sin() * 0.5).collect();
        let msg = Message::audio(seq, seq as u64 * 5805, &samples);
        sent.push(msg.encode());
        write_message(&mut sender, &msg).await.unwrap();
    }

    for (i, original) in sent.iter().enumerate() {
        let received = timeout(Duration::from_secs(2), read_message(&mut receiver))
            .await
            .expect("timed out waiting for forwarded frame")
            .expect("read forwarded frame");
        assert_eq!(received.kind, MessageKind::AudioData);
        assert_eq!(received.sequence, i as u32 + 1);
        // Byte-for-byte identical to what the sender wrote.
        assert_eq!(&received.encode(), original);
    }

    // The sender receives none of its own audio.
    assert_no_message(&mut sender).await;

    server.shutdown().await;
}

#[tokio::test]
async fn unready_client_receives_no_audio() {
    let server = start_relay().await;
    let mut sender = ready_client(&server).await;

    // The second client registers and configures but never goes ready.
    let mut lurker = TcpStream::connect(server.local_addr()).await.unwrap();
    write_message(&mut lurker, &Message::connect(0)).await.unwrap();
    write_message(&mut lurker, &Message::config(0, &TEST_CONFIG))
        .await
        .unwrap();
    wait_for_clients(&server, 2).await;

    for seq in 1u32..=5 {
        let msg = Message::audio(seq, 0, &[0.2f32; 64]);
        write_message(&mut sender, &msg).await.unwrap();
    }

    assert_no_message(&mut lurker).await;
    server.shutdown().await;
}

#[tokio::test]
async fn heartbeat_echoes_to_sender_only() {
    let server = start_relay().await;
    let mut a = ready_client(&server).await;
    let mut b = ready_client(&server).await;
    wait_for_ready(&server, 2).await;

    let heartbeat = Message::heartbeat(777);
    write_message(&mut a, &heartbeat).await.unwrap();

    let echoed = timeout(Duration::from_secs(2), read_message(&mut a))
        .await
        .expect("timed out waiting for echo")
        .expect("read echo");
    assert_eq!(echoed.kind, MessageKind::Heartbeat);
    assert_eq!(echoed.timestamp, 777);
    assert!(echoed.payload.is_empty());

    // Nobody else sees it.
    assert_no_message(&mut b).await;

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_removes_the_session() {
    let server = start_relay().await;
    let mut leaver = ready_client(&server).await;
    let mut stayer = ready_client(&server).await;
    wait_for_ready(&server, 2).await;

    write_message(&mut leaver, &Message::disconnect(0)).await.unwrap();
    wait_for_clients(&server, 1).await;

    // Frames from the remaining client no longer reach the departed one,
    // and the relay keeps working for everyone else.
    let msg = Message::audio(1, 0, &[0.3f32; 64]);
    write_message(&mut stayer, &msg).await.unwrap();
    assert_eq!(server.connected_clients(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn dropped_socket_cleans_up_like_disconnect() {
    let server = start_relay().await;
    let client = ready_client(&server).await;
    wait_for_ready(&server, 1).await;

    drop(client);
    wait_for_clients(&server, 0).await;

    server.shutdown().await;
}

#[tokio::test]
async fn corrupt_framing_tears_the_connection_down() {
    use tokio::io::AsyncWriteExt;

    let server = start_relay().await;
    let mut client = ready_client(&server).await;
    wait_for_ready(&server, 1).await;

    // A frame with a broken magic can never be resynchronized.
    let mut bytes = Message::heartbeat(0).encode().to_vec();
    bytes[0] = 0xff;
    client.write_all(&bytes).await.unwrap();
    client.flush().await.unwrap();

    wait_for_clients(&server, 0).await;
    assert_eq!(server.stats().clients_errored, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn late_joiner_gets_only_subsequent_audio() {
    let server = start_relay().await;
    let mut sender = ready_client(&server).await;
    wait_for_ready(&server, 1).await;

    // Audio sent before the peer joins is gone forever.
    for seq in 1u32..=3 {
        let msg = Message::audio(seq, 0, &[0.4f32; 64]);
        write_message(&mut sender, &msg).await.unwrap();
    }
    // Give the relay time to fan out (to nobody).
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut joiner = ready_client(&server).await;
    wait_for_ready(&server, 2).await;

    let msg = Message::audio(4, 0, &[0.5f32; 64]);
    write_message(&mut sender, &msg).await.unwrap();

    let received = timeout(Duration::from_secs(2), read_message(&mut joiner))
        .await
        .expect("timed out")
        .expect("read");
    assert_eq!(received.sequence, 4);

    server.shutdown().await;
}
