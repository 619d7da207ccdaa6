use ackgram::config::SenderConfig;
use ackgram::frame::Frame;
use ackgram::unicast::UnicastSender;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt()
        // .with_max_level(Level::INFO)
        // .with_max_level(Level::DEBUG)
        .with_max_level(Level::TRACE)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    // a receiver that acknowledges every frame it can decode
    let receiver = UdpSocket::bind("127.0.0.1:9101").await?;
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            let (len, from) = match receiver.recv_from(&mut buf).await {
                Ok(ok) => ok,
                Err(_) => return,
            };
            let mut raw = &buf[..len];
            let frame = match Frame::try_deser(&mut raw, true, true) {
                Ok(frame) => frame,
                Err(e) => {
                    info!("dropping malformed datagram from {:?}: {}", from, e);
                    continue;
                }
            };
            info!("received {:?} from {:?}", frame, from);
            if let Some(ack) = &frame.ack {
                let _ = receiver
                    .send_to(&ack.reply_payload(), (ack.host.as_str(), ack.port))
                    .await;
            }
        }
    });

    let config = SenderConfig::acknowledged(
        "127.0.0.1",
        9101,
        "127.0.0.1",
        0,
        Duration::from_secs(2),
    );
    let sender = UnicastSender::new(config)?;
    sender.start().await?;
    info!("awaiting acks on port {}", sender.ack_port());

    sender.send(b"first").await?;
    info!("first send acknowledged");
    sender.send(b"second").await?;
    info!("second send acknowledged");

    sender.stop().await;

    Ok(())
}
