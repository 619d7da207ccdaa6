//! Helpers shared by the integration tests: plain UDP receivers and the behavior of a
//!  cooperating remote receiver that acknowledges what it got.
#![allow(dead_code)]

use ackgram::frame::{AckHeader, Frame};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

pub const RECV_DEADLINE: Duration = Duration::from_secs(5);

pub async fn bind_receiver() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

pub async fn recv_with_deadline(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (num_read, from) = timeout(RECV_DEADLINE, socket.recv_from(&mut buf))
        .await
        .expect("no datagram within the deadline")
        .unwrap();
    (buf[..num_read].to_vec(), from)
}

pub fn decode_acked(raw: &[u8], length_check: bool) -> Frame {
    let mut b = raw;
    Frame::try_deser(&mut b, true, length_check).unwrap()
}

/// Acknowledges the way a cooperating receiver does: the textual id, sent from a fresh
///  ephemeral socket to the host and port embedded in the frame.
pub async fn send_ack(ack: &AckHeader) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    send_ack_from(&socket, ack).await;
}

pub async fn send_ack_from(socket: &UdpSocket, ack: &AckHeader) {
    socket
        .send_to(&ack.reply_payload(), (ack.host.as_str(), ack.port))
        .await
        .unwrap();
}

/// Bounded poll for the ack listener's port, the bootstrap pattern for lazily started
///  listeners.
pub async fn wait_for_ack_port(port: impl Fn() -> u16) -> u16 {
    for _ in 0..200 {
        let p = port();
        if p != 0 {
            return p;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ack listener did not come up within 2s");
}
