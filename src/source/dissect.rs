use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::capture::Frame;
use super::error::{Error, Result};
use crate::common::consts::*;
use crate::common::enums::{EthernetType, IpProtocol, PortProtocol};
use crate::common::{Connection, Port};
use crate::utils::bytes::read_u16_be;

// Outcome of dissecting one frame. `packet_size` is the recorded length
// from the network layer on (wire length minus the link header) and is
// what ends up in the event payload; `payload_size` is the transport
// payload estimate that drives per-flow cutoff accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dissection {
    pub conn: Connection,
    pub payload_size: u64,
    pub packet_size: u64,
}

// Parses the Ethernet, IP and transport headers of a raw frame. Non-IP
// EtherTypes dissect to None and are skipped without an error. Length
// checks run against the wire length, reads against the captured bytes.
pub fn dissect(frame: &Frame) -> Result<Option<Dissection>> {
    if frame.data.len() < ETH_HEADER_SIZE {
        return Ok(None);
    }
    let eth_type = read_u16_be(&frame.data[FIELD_OFFSET_ETH_TYPE..]);
    let layer3 = &frame.data[ETH_HEADER_SIZE..];
    let packet_size = frame.wire_len.saturating_sub(ETH_HEADER_SIZE) as u64;
    let mut payload_size = packet_size;

    let (src_ip, dst_ip, proto, layer4): (IpAddr, IpAddr, u8, &[u8]) =
        match EthernetType::try_from(eth_type) {
            Ok(EthernetType::Ipv4) => {
                if frame.wire_len < ETH_HEADER_SIZE + IPV4_MIN_HEADER_SIZE
                    || layer3.len() < IPV4_MIN_HEADER_SIZE
                {
                    return Err(Error::Ipv4HeaderTooShort(layer3.len()));
                }
                let header_size = ((layer3[0] & 0x0f) as usize) * 4;
                if header_size < IPV4_MIN_HEADER_SIZE {
                    return Err(Error::Ipv4HeaderTooShort(header_size));
                }
                if layer3.len() < header_size {
                    return Err(Error::Ipv4HeaderTooShort(layer3.len()));
                }
                let src = Ipv4Addr::from(
                    <[u8; 4]>::try_from(&layer3[IPV4_OFFSET_SIP..IPV4_OFFSET_SIP + 4]).unwrap(),
                );
                let dst = Ipv4Addr::from(
                    <[u8; 4]>::try_from(&layer3[IPV4_OFFSET_DIP..IPV4_OFFSET_DIP + 4]).unwrap(),
                );
                payload_size = payload_size.saturating_sub(header_size as u64);
                (
                    src.into(),
                    dst.into(),
                    layer3[IPV4_OFFSET_PROTOCOL],
                    &layer3[header_size..],
                )
            }
            Ok(EthernetType::Ipv6) => {
                if frame.wire_len < ETH_HEADER_SIZE + IPV6_HEADER_SIZE
                    || layer3.len() < IPV6_HEADER_SIZE
                {
                    return Err(Error::Ipv6HeaderTooShort(layer3.len()));
                }
                let src = Ipv6Addr::from(
                    <[u8; 16]>::try_from(&layer3[IPV6_OFFSET_SIP..IPV6_OFFSET_SIP + 16]).unwrap(),
                );
                let dst = Ipv6Addr::from(
                    <[u8; 16]>::try_from(&layer3[IPV6_OFFSET_DIP..IPV6_OFFSET_DIP + 16]).unwrap(),
                );
                payload_size = payload_size.saturating_sub(IPV6_HEADER_SIZE as u64);
                (
                    src.into(),
                    dst.into(),
                    layer3[IPV6_OFFSET_NEXT_HEADER],
                    &layer3[IPV6_HEADER_SIZE..],
                )
            }
            _ => return Ok(None),
        };

    let (src_port, dst_port) = match IpProtocol::try_from(proto) {
        Ok(IpProtocol::Tcp) if layer4.len() > TCP_OFFSET_DATA_OFFSET => {
            let sport = read_u16_be(layer4);
            let dport = read_u16_be(&layer4[2..]);
            let data_offset = ((layer4[TCP_OFFSET_DATA_OFFSET] >> 4) as u64) * 4;
            payload_size = payload_size.saturating_sub(data_offset);
            (
                Port::new(sport, PortProtocol::Tcp),
                Port::new(dport, PortProtocol::Tcp),
            )
        }
        Ok(IpProtocol::Udp) if layer4.len() >= 4 => {
            let sport = read_u16_be(layer4);
            let dport = read_u16_be(&layer4[2..]);
            payload_size = payload_size.saturating_sub(UDP_HEADER_SIZE as u64);
            (
                Port::new(sport, PortProtocol::Udp),
                Port::new(dport, PortProtocol::Udp),
            )
        }
        Ok(IpProtocol::Icmp) if layer4.len() >= 2 => {
            let message_type = layer4[0];
            let message_code = layer4[1];
            payload_size = payload_size.saturating_sub(ICMP_HEADER_SIZE as u64);
            (
                Port::new(message_type as u16, PortProtocol::Icmp),
                Port::new(message_code as u16, PortProtocol::Icmp),
            )
        }
        // Unrecognized transports and captures truncated inside the
        // transport header keep default-zero ports.
        _ => (Port::default(), Port::default()),
    };

    Ok(Some(Dissection {
        conn: Connection {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        },
        payload_size,
        packet_size,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: Vec<u8>) -> Frame {
        Frame {
            ts_sec: 0,
            ts_sub: 0,
            caplen: data.len(),
            wire_len: data.len(),
            data,
        }
    }

    fn eth_header(eth_type: u16) -> Vec<u8> {
        let mut data = vec![0u8; ETH_HEADER_SIZE];
        data[FIELD_OFFSET_ETH_TYPE..].copy_from_slice(&eth_type.to_be_bytes());
        data
    }

    fn ipv4_header(proto: u8, src: [u8; 4], dst: [u8; 4], total_len: usize) -> Vec<u8> {
        let mut header = vec![0u8; IPV4_MIN_HEADER_SIZE];
        header[0] = 0x45;
        header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        header[IPV4_OFFSET_PROTOCOL] = proto;
        header[IPV4_OFFSET_SIP..IPV4_OFFSET_SIP + 4].copy_from_slice(&src);
        header[IPV4_OFFSET_DIP..IPV4_OFFSET_DIP + 4].copy_from_slice(&dst);
        header
    }

    fn tcp_header(sport: u16, dport: u16) -> Vec<u8> {
        let mut header = vec![0u8; 20];
        header[0..2].copy_from_slice(&sport.to_be_bytes());
        header[2..4].copy_from_slice(&dport.to_be_bytes());
        header[TCP_OFFSET_DATA_OFFSET] = 5 << 4;
        header
    }

    fn udp_header(sport: u16, dport: u16) -> Vec<u8> {
        let mut header = vec![0u8; UDP_HEADER_SIZE];
        header[0..2].copy_from_slice(&sport.to_be_bytes());
        header[2..4].copy_from_slice(&dport.to_be_bytes());
        header
    }

    fn tcp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload_len: usize,
    ) -> Frame {
        let mut data = eth_header(EthernetType::Ipv4.into());
        let total_len = IPV4_MIN_HEADER_SIZE + 20 + payload_len;
        data.extend(ipv4_header(IpProtocol::Tcp.into(), src, dst, total_len));
        data.extend(tcp_header(sport, dport));
        data.extend(vec![0u8; payload_len]);
        frame(data)
    }

    #[test]
    fn ipv4_tcp() {
        let frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 4321, 80, 100);
        let d = dissect(&frame).unwrap().unwrap();
        assert_eq!(d.conn.src_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(d.conn.dst_ip, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(d.conn.src_port, Port::new(4321, PortProtocol::Tcp));
        assert_eq!(d.conn.dst_port, Port::new(80, PortProtocol::Tcp));
        assert_eq!(d.payload_size, 100);
        assert_eq!(d.packet_size, (IPV4_MIN_HEADER_SIZE + 20 + 100) as u64);
    }

    #[test]
    fn ipv4_udp() {
        let mut data = eth_header(EthernetType::Ipv4.into());
        data.extend(ipv4_header(
            IpProtocol::Udp.into(),
            [192, 168, 0, 1],
            [192, 168, 0, 2],
            IPV4_MIN_HEADER_SIZE + UDP_HEADER_SIZE + 64,
        ));
        data.extend(udp_header(5353, 5353));
        data.extend(vec![0u8; 64]);
        let d = dissect(&frame(data)).unwrap().unwrap();
        assert_eq!(d.conn.src_port, Port::new(5353, PortProtocol::Udp));
        assert_eq!(d.payload_size, 64);
    }

    #[test]
    fn ipv6_udp_extracts_full_addresses() {
        let src: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let dst: [u8; 16] = [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];
        let mut data = eth_header(EthernetType::Ipv6.into());
        let mut header = vec![0u8; IPV6_HEADER_SIZE];
        header[0] = 0x60;
        header[IPV6_OFFSET_NEXT_HEADER] = IpProtocol::Udp.into();
        header[IPV6_OFFSET_SIP..IPV6_OFFSET_SIP + 16].copy_from_slice(&src);
        header[IPV6_OFFSET_DIP..IPV6_OFFSET_DIP + 16].copy_from_slice(&dst);
        data.extend(header);
        data.extend(udp_header(1000, 2000));
        data.extend(vec![0u8; 32]);
        let d = dissect(&frame(data)).unwrap().unwrap();
        assert_eq!(d.conn.src_ip, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(d.conn.dst_ip, "2001:db8::2".parse::<IpAddr>().unwrap());
        assert!(matches!(d.conn.src_ip, IpAddr::V6(_)));
        assert_eq!(d.payload_size, 32);
    }

    #[test]
    fn icmp_type_and_code_become_ports() {
        let mut data = eth_header(EthernetType::Ipv4.into());
        data.extend(ipv4_header(
            IpProtocol::Icmp.into(),
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            IPV4_MIN_HEADER_SIZE + ICMP_HEADER_SIZE,
        ));
        let mut icmp = vec![0u8; ICMP_HEADER_SIZE];
        icmp[0] = 8; // echo request
        icmp[1] = 0;
        data.extend(icmp);
        let d = dissect(&frame(data)).unwrap().unwrap();
        assert_eq!(d.conn.src_port, Port::new(8, PortProtocol::Icmp));
        assert_eq!(d.conn.dst_port, Port::new(0, PortProtocol::Icmp));
        assert_eq!(d.conn.icmp_type(), Some(8));
        assert_eq!(d.conn.icmp_code(), Some(0));
    }

    #[test]
    fn arp_is_silently_skipped() {
        let mut data = eth_header(EthernetType::Arp.into());
        data.extend(vec![0u8; 28]);
        assert_eq!(dissect(&frame(data)).unwrap(), None);
    }

    #[test]
    fn bogus_ihl_reports_header_too_short() {
        let mut data = eth_header(EthernetType::Ipv4.into());
        let mut header = ipv4_header(IpProtocol::Tcp.into(), [1, 1, 1, 1], [2, 2, 2, 2], 40);
        header[0] = 0x44; // ihl = 4, i.e. a 16 byte header
        data.extend(header);
        data.extend(vec![0u8; 20]);
        match dissect(&frame(data)) {
            Err(Error::Ipv4HeaderTooShort(size)) => assert_eq!(size, 16),
            other => panic!("unexpected dissection: {:?}", other),
        }
    }

    #[test]
    fn short_ipv4_frame_is_an_error() {
        let mut data = eth_header(EthernetType::Ipv4.into());
        data.extend(vec![0u8; 10]);
        assert!(matches!(
            dissect(&frame(data)),
            Err(Error::Ipv4HeaderTooShort(_))
        ));
    }

    #[test]
    fn unknown_transport_keeps_zero_ports() {
        let mut data = eth_header(EthernetType::Ipv4.into());
        data.extend(ipv4_header(47, [10, 0, 0, 1], [10, 0, 0, 2], 60));
        data.extend(vec![0u8; 40]);
        let d = dissect(&frame(data)).unwrap().unwrap();
        assert_eq!(d.conn.src_port, Port::default());
        assert_eq!(d.conn.dst_port, Port::default());
        // No transport header subtraction for unknown protocols.
        assert_eq!(d.payload_size, 40);
    }
}
