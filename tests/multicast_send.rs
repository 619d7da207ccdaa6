//! End-to-end multicast tests. Multicast routing is not available in every environment
//!  (containers and CI runners often lack it), so every test probes group delivery first
//!  and skips itself when the probe fails.

mod common;

use ackgram::config::SenderConfig;
use ackgram::error::SendError;
use ackgram::multicast::MulticastSender;
use ackgram::socket_registry::SocketRegistry;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const GROUP: Ipv4Addr = Ipv4Addr::new(225, 6, 7, 8);

/// Group ports must differ per test (they run concurrently in one process) and between
///  test processes on a shared machine.
fn next_group_port() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(0);
    let base = 21000 + (std::process::id() % 10000) as u16;
    base + NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A group member's socket: bound to the group port with SO_REUSEADDR so that several
///  members can coexist on one host, joined to the test group.
fn join_group(port: u16) -> Option<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).ok()?;
    socket.set_reuse_address(true).ok()?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())
        .ok()?;
    socket
        .join_multicast_v4(&GROUP, &Ipv4Addr::UNSPECIFIED)
        .ok()?;
    socket.set_nonblocking(true).ok()?;
    UdpSocket::from_std(socket.into()).ok()
}

/// One probe datagram to the group; true iff every member saw it.
async fn group_delivery_works(port: u16, members: &[&UdpSocket]) -> bool {
    let Ok(probe) = UdpSocket::bind("0.0.0.0:0").await else {
        return false;
    };
    if probe.send_to(b"probe", (GROUP, port)).await.is_err() {
        return false;
    }

    for member in members {
        let mut buf = [0u8; 16];
        match tokio::time::timeout(Duration::from_millis(500), member.recv_from(&mut buf)).await {
            Ok(Ok((num_read, _))) if &buf[..num_read] == b"probe" => {}
            _ => return false,
        }
    }
    true
}

#[tokio::test]
async fn multicast_fan_out_reaches_all_members() {
    let port = next_group_port();
    let (Some(m1), Some(m2)) = (join_group(port), join_group(port)) else {
        eprintln!("skipping - cannot join multicast group");
        return;
    };
    if !group_delivery_works(port, &[&m1, &m2]).await {
        eprintln!("skipping - multicast delivery unavailable in this environment");
        return;
    }

    let mut config = SenderConfig::fire_and_forget(GROUP.to_string(), port);
    config.time_to_live = Some(1);
    let sender = MulticastSender::with_registry(config, Arc::new(SocketRegistry::new())).unwrap();

    sender.send(b"fan-out").await.unwrap();

    let (raw1, _) = common::recv_with_deadline(&m1).await;
    let (raw2, _) = common::recv_with_deadline(&m2).await;
    assert_eq!(raw1, b"fan-out");
    assert_eq!(raw2, b"fan-out");

    sender.stop().await;
}

#[tokio::test]
async fn quorum_of_two_distinct_members_succeeds() {
    let port = next_group_port();
    let (Some(m1), Some(m2)) = (join_group(port), join_group(port)) else {
        eprintln!("skipping - cannot join multicast group");
        return;
    };
    if !group_delivery_works(port, &[&m1, &m2]).await {
        eprintln!("skipping - multicast delivery unavailable in this environment");
        return;
    }

    let mut config = SenderConfig::acknowledged(
        GROUP.to_string(),
        port,
        "127.0.0.1",
        0,
        Duration::from_secs(5),
    );
    config.min_acks_for_success = 2;
    let sender = MulticastSender::with_registry(config, Arc::new(SocketRegistry::new())).unwrap();
    sender.start().await.unwrap();

    // each member acks from its own ephemeral socket - two distinct repliers
    async fn ack_member(socket: &UdpSocket) {
        let (raw, _) = common::recv_with_deadline(socket).await;
        let frame = common::decode_acked(&raw, true);
        assert_eq!(frame.payload.as_ref(), b"quorum");
        common::send_ack(&frame.ack.unwrap()).await;
    }

    let (send_result, _, _) = tokio::join!(sender.send(b"quorum"), ack_member(&m1), ack_member(&m2));
    send_result.unwrap();

    sender.stop().await;
}

#[tokio::test]
async fn quorum_fails_with_too_few_acks() {
    let port = next_group_port();
    let Some(m1) = join_group(port) else {
        eprintln!("skipping - cannot join multicast group");
        return;
    };
    if !group_delivery_works(port, &[&m1]).await {
        eprintln!("skipping - multicast delivery unavailable in this environment");
        return;
    }

    let mut config = SenderConfig::acknowledged(
        GROUP.to_string(),
        port,
        "127.0.0.1",
        0,
        Duration::from_millis(300),
    );
    config.min_acks_for_success = 2;
    let sender = MulticastSender::with_registry(config, Arc::new(SocketRegistry::new())).unwrap();

    let (send_result, _) = tokio::join!(sender.send(b"one is not enough"), async {
        let (raw, _) = common::recv_with_deadline(&m1).await;
        let frame = common::decode_acked(&raw, true);
        common::send_ack(&frame.ack.unwrap()).await;
    });

    match send_result {
        Err(SendError::AckTimeout {
            required, received, ..
        }) => {
            assert_eq!(required, 2);
            assert_eq!(received, 1);
        }
        other => panic!("expected AckTimeout, got {:?}", other),
    }

    sender.stop().await;
}

#[tokio::test]
async fn duplicate_acks_from_one_member_count_once() {
    let port = next_group_port();
    let Some(m1) = join_group(port) else {
        eprintln!("skipping - cannot join multicast group");
        return;
    };
    if !group_delivery_works(port, &[&m1]).await {
        eprintln!("skipping - multicast delivery unavailable in this environment");
        return;
    }

    let mut config = SenderConfig::acknowledged(
        GROUP.to_string(),
        port,
        "127.0.0.1",
        0,
        Duration::from_millis(300),
    );
    config.min_acks_for_success = 2;
    let sender = MulticastSender::with_registry(config, Arc::new(SocketRegistry::new())).unwrap();

    let (send_result, _) = tokio::join!(sender.send(b"same source twice"), async {
        let (raw, _) = common::recv_with_deadline(&m1).await;
        let frame = common::decode_acked(&raw, true);
        let ack = frame.ack.unwrap();

        // both acks leave the same socket, so they are one replier
        let replier = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        common::send_ack_from(&replier, &ack).await;
        common::send_ack_from(&replier, &ack).await;
    });

    match send_result {
        Err(SendError::AckTimeout {
            required, received, ..
        }) => {
            assert_eq!(required, 2);
            assert_eq!(received, 1);
        }
        other => panic!("expected AckTimeout, got {:?}", other),
    }

    sender.stop().await;
}
