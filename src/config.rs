use anyhow::bail;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration shared by the unicast and multicast senders. All fields are public; the
///  constructors cover the two typical setups and everything else is adjusted directly.
pub struct SenderConfig {
    /// Host name or literal IP of the destination. Resolved freshly at send time, so DNS
    ///  changes take effect without restarting the handler. For multicast this must be a
    ///  literal group address.
    pub destination_host: String,
    pub destination_port: u16,

    /// When enabled, every frame starts with a length field and receivers reject datagrams
    ///  whose actual size disagrees with it - the cheap integrity check of this protocol.
    pub length_check: bool,

    /// When enabled, every send blocks until the receiver(s) acknowledged the frame or
    ///  `ack_timeout` passed. When disabled, sends are fire-and-forget.
    pub acknowledge: bool,

    /// The host receivers send their acknowledgment to. Transmitted inside each frame, so it
    ///  must name this process as seen from the receivers - `localhost` only works when
    ///  everything runs on one machine. Required when `acknowledge` is set.
    pub ack_host: Option<String>,

    /// Local port the ack listener binds to. 0 binds an ephemeral port, discoverable through
    ///  the sender's `ack_port()` once the listener is up. The listener binds the unspecified
    ///  address of `local_address`'s family.
    pub ack_port: u16,

    /// How long an acknowledged send waits before failing with an ack timeout.
    pub ack_timeout: Duration,

    /// How many distinct receivers must acknowledge a multicast send for it to succeed.
    ///  Unicast sends always wait for exactly one.
    pub min_acks_for_success: usize,

    /// Local address the outbound socket binds to. Senders configured with the same explicit
    ///  address share one socket through the [crate::socket_registry::SocketRegistry]. Its
    ///  address family decides which family destinations resolve to and which family the ack
    ///  listener serves - an IPv6 deployment sets an IPv6 address here.
    pub local_address: SocketAddr,

    /// IP time-to-live for outgoing multicast datagrams, i.e. how many hops the group
    ///  propagation may take. `None` keeps the OS default.
    pub time_to_live: Option<u32>,
}

impl SenderConfig {
    pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Plain fire-and-forget setup: no length field, no acknowledgments.
    pub fn fire_and_forget(
        destination_host: impl Into<String>,
        destination_port: u16,
    ) -> SenderConfig {
        SenderConfig {
            destination_host: destination_host.into(),
            destination_port,
            length_check: false,
            acknowledge: false,
            ack_host: None,
            ack_port: 0,
            ack_timeout: Self::DEFAULT_ACK_TIMEOUT,
            min_acks_for_success: 1,
            local_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            time_to_live: None,
        }
    }

    /// Reliable setup: every send blocks until acknowledged. Also enables the length check,
    ///  which is the usual pairing when reliability matters.
    pub fn acknowledged(
        destination_host: impl Into<String>,
        destination_port: u16,
        ack_host: impl Into<String>,
        ack_port: u16,
        ack_timeout: Duration,
    ) -> SenderConfig {
        SenderConfig {
            destination_host: destination_host.into(),
            destination_port,
            length_check: true,
            acknowledge: true,
            ack_host: Some(ack_host.into()),
            ack_port,
            ack_timeout,
            min_acks_for_success: 1,
            local_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            time_to_live: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.destination_host.is_empty() {
            bail!("destination host must not be empty");
        }
        if self.acknowledge {
            match &self.ack_host {
                None => bail!("ack host is required when acknowledgments are enabled"),
                Some(host) if host.is_empty() => bail!("ack host must not be empty"),
                Some(host) if host.len() > u8::MAX as usize => {
                    bail!("ack host must fit into {} bytes, was {}", u8::MAX, host.len())
                }
                Some(_) => {}
            }
            if self.ack_timeout.is_zero() {
                bail!("ack timeout must be positive");
            }
        }
        if self.min_acks_for_success == 0 {
            bail!("at least one ack must be required for success");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fire_and_forget(SenderConfig::fire_and_forget("localhost", 4711), true)]
    #[case::acknowledged(SenderConfig::acknowledged("localhost", 4711, "localhost", 0, Duration::from_secs(5)), true)]
    #[case::empty_destination(SenderConfig::fire_and_forget("", 4711), false)]
    #[case::ack_without_host(SenderConfig { ack_host: None, ..SenderConfig::acknowledged("localhost", 4711, "x", 0, Duration::from_secs(5)) }, false)]
    #[case::ack_with_empty_host(SenderConfig::acknowledged("localhost", 4711, "", 0, Duration::from_secs(5)), false)]
    #[case::ack_with_overlong_host(SenderConfig::acknowledged("localhost", 4711, "x".repeat(256), 0, Duration::from_secs(5)), false)]
    #[case::zero_ack_timeout(SenderConfig::acknowledged("localhost", 4711, "localhost", 0, Duration::ZERO), false)]
    #[case::zero_min_acks(SenderConfig { min_acks_for_success: 0, ..SenderConfig::fire_and_forget("localhost", 4711) }, false)]
    fn test_validate(#[case] config: SenderConfig, #[case] expect_valid: bool) {
        assert_eq!(config.validate().is_ok(), expect_valid);
    }
}
