use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

// According to http://www.iana.org/assignments/ieee-802-numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum EthernetType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Dot1Q = 0x8100,
    Ipv6 = 0x86dd,
}

impl PartialEq<u16> for EthernetType {
    fn eq(&self, other: &u16) -> bool {
        u16::from(*self).eq(other)
    }
}

impl PartialEq<EthernetType> for u16 {
    fn eq(&self, other: &EthernetType) -> bool {
        u16::from(*other).eq(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

// Transport discriminator of a port. ICMP "ports" carry the message type
// and code by convention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PortProtocol {
    Tcp,
    Udp,
    Icmp,
    #[default]
    Unknown,
}

impl From<IpProtocol> for PortProtocol {
    fn from(proto: IpProtocol) -> Self {
        match proto {
            IpProtocol::Icmp => PortProtocol::Icmp,
            IpProtocol::Tcp => PortProtocol::Tcp,
            IpProtocol::Udp => PortProtocol::Udp,
        }
    }
}

impl fmt::Display for PortProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortProtocol::Tcp => write!(f, "tcp"),
            PortProtocol::Udp => write!(f, "udp"),
            PortProtocol::Icmp => write!(f, "icmp"),
            PortProtocol::Unknown => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_type_wire_values() {
        assert_eq!(EthernetType::Ipv4, 0x0800u16);
        assert_eq!(0x86ddu16, EthernetType::Ipv6);
        assert_eq!(Ok(EthernetType::Arp), EthernetType::try_from(0x0806u16));
        assert!(EthernetType::try_from(0x88ccu16).is_err());
    }

    #[test]
    fn ip_protocol_wire_values() {
        assert_eq!(Ok(IpProtocol::Tcp), IpProtocol::try_from(6u8));
        assert_eq!(PortProtocol::from(IpProtocol::Udp), PortProtocol::Udp);
        assert!(IpProtocol::try_from(47u8).is_err());
    }
}
