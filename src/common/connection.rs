use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use super::enums::PortProtocol;
use super::port::Port;

// Directional 4-tuple identifying a flow. The capture order of the first
// packet fixes the originator side; reverse-direction packets form a
// distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: Port,
    pub dst_port: Port,
}

impl Default for Connection {
    fn default() -> Self {
        Connection {
            src_ip: Ipv4Addr::UNSPECIFIED.into(),
            dst_ip: Ipv4Addr::UNSPECIFIED.into(),
            src_port: Port::default(),
            dst_port: Port::default(),
        }
    }
}

impl Connection {
    /// ICMP message type, if this connection was keyed from an ICMP packet.
    pub fn icmp_type(&self) -> Option<u8> {
        if self.src_port.proto == PortProtocol::Icmp {
            Some(self.src_port.number as u8)
        } else {
            None
        }
    }

    /// ICMP message code, if this connection was keyed from an ICMP packet.
    pub fn icmp_code(&self) -> Option<u8> {
        if self.dst_port.proto == PortProtocol::Icmp {
            Some(self.dst_port.number as u8)
        } else {
            None
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} > {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}
