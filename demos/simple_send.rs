use ackgram::config::SenderConfig;
use ackgram::unicast::UnicastSender;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::sleep;
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

    let receiver = UdpSocket::bind("127.0.0.1:9100").await?;
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        loop {
            match receiver.recv_from(&mut buf).await {
                Ok((len, from)) => info!("received {:?} from {:?}", &buf[..len], from),
                Err(_) => return,
            }
        }
    });

    let sender = UnicastSender::new(SenderConfig::fire_and_forget("127.0.0.1", 9100))?;

    sender.send(&[1, 2, 3]).await?;
    sender.send(&[2, 3, 4, 5]).await?;
    sender.send(&[7]).await?;
    sender.send(&[4, 5, 6]).await?;

    sleep(Duration::from_millis(20)).await;
    sender.stop().await;

    Ok(())
}
