//! Fixed PTP network parameters and the outbound send capability

use std::fmt;
use std::net::Ipv4Addr;

use crate::PlatformResult;

/// PTP event message port (IEEE 1588)
pub const PTP_EVENT_PORT: u16 = 319;

/// PTP general message port (IEEE 1588)
pub const PTP_GENERAL_PORT: u16 = 320;

/// Primary multicast group used by ordinary PTP traffic
pub const PTP_PRIMARY_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);

/// Multicast group reserved for the peer-to-peer delay mechanism
pub const PTP_PEER_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 107);

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Which of the two PTP endpoints a datagram belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PtpPort {
    /// Timestamped messages (Sync, Delay_Req, ...)
    Event,
    /// Untimestamped messages (Announce, Follow_Up, ...)
    General,
}

impl PtpPort {
    pub const ALL: [PtpPort; 2] = [PtpPort::Event, PtpPort::General];

    /// Well-known port number
    pub fn well_known(self) -> u16 {
        match self {
            PtpPort::Event => PTP_EVENT_PORT,
            PtpPort::General => PTP_GENERAL_PORT,
        }
    }
}

impl fmt::Display for PtpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtpPort::Event => f.write_str("event"),
            PtpPort::General => f.write_str("general"),
        }
    }
}

/// Outbound datagram capability.
///
/// Both calls are all-or-nothing: `Ok(n)` means all `n == data.len()` bytes
/// were handed to the network, an error means nothing was transmitted.
pub trait PtpSender {
    /// Send to the primary multicast group on the event port
    fn send_event(&mut self, data: &[u8]) -> PlatformResult<usize>;

    /// Send to the primary multicast group on the general port
    fn send_general(&mut self, data: &[u8]) -> PlatformResult<usize>;

    /// Send on whichever port `port` names
    fn send_on(&mut self, port: PtpPort, data: &[u8]) -> PlatformResult<usize> {
        match port {
            PtpPort::Event => self.send_event(data),
            PtpPort::General => self.send_general(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_ports() {
        assert_eq!(PtpPort::Event.well_known(), 319);
        assert_eq!(PtpPort::General.well_known(), 320);
    }

    #[test]
    fn test_groups_are_multicast() {
        assert!(PTP_PRIMARY_MULTICAST.is_multicast());
        assert!(PTP_PEER_MULTICAST.is_multicast());
    }
}
