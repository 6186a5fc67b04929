use crate::address::Address;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use std::fmt;

/// Linux cooked header (DLT_LINUX_SLL): packet type, ARPHRD type,
/// address length, 8 address bytes, then the 16-bit protocol.
pub const SLL_HEADER_LEN: usize = 16;
pub const SLL_PROTOCOL_OFFSET: usize = 14;
pub const SLL_PROTOCOL_IPV4: u16 = 0x0800;
pub const SLL_PROTOCOL_IPV6: u16 = 0x86DD;

const IPV6_HEADER_LEN: usize = 40;

/// Transport protocol of a packet or socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// One observed TCP or UDP frame
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub src: Address,
    pub dst: Address,
    pub src_port: u16,
    pub dst_port: u16,
    /// Wire length of the frame, not the captured length
    pub len: u32,
    pub protocol: Protocol,
    /// Capture timestamp in seconds since the epoch
    pub ts: f64,
}

/// A raw frame as handed over by the capture mechanism
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub orig_len: u32,
    pub ts: f64,
}

/// Decode a Linux cooked frame into a packet record.
///
/// Returns `None` for anything that is not TCP or UDP over IPv4/IPv6, and
/// for frames too short to hold the headers they announce.
pub fn decode_frame(frame: &Frame<'_>) -> Option<PacketRecord> {
    let protocol_field = frame
        .data
        .get(SLL_PROTOCOL_OFFSET..SLL_HEADER_LEN)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))?;
    let payload = &frame.data[SLL_HEADER_LEN..];

    let (src, dst, next, transport) = match protocol_field {
        SLL_PROTOCOL_IPV4 => {
            let ipv4 = Ipv4Packet::new(payload)?;
            let header_len = usize::from(ipv4.get_header_length()) * 4;
            if header_len < Ipv4Packet::minimum_packet_size() {
                return None;
            }
            (
                Address::from(ipv4.get_source()),
                Address::from(ipv4.get_destination()),
                ipv4.get_next_level_protocol(),
                payload.get(header_len..)?,
            )
        }
        SLL_PROTOCOL_IPV6 => {
            let ipv6 = Ipv6Packet::new(payload)?;
            (
                Address::from(ipv6.get_source()),
                Address::from(ipv6.get_destination()),
                ipv6.get_next_header(),
                payload.get(IPV6_HEADER_LEN..)?,
            )
        }
        _ => return None,
    };

    let (protocol, src_port, dst_port) = transport_ports(next, transport)?;

    Some(PacketRecord {
        src,
        dst,
        src_port,
        dst_port,
        len: frame.orig_len,
        protocol,
        ts: frame.ts,
    })
}

fn transport_ports(next: IpNextHeaderProtocol, data: &[u8]) -> Option<(Protocol, u16, u16)> {
    match next {
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(data)?;
            Some((Protocol::Tcp, tcp.get_source(), tcp.get_destination()))
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(data)?;
            Some((Protocol::Udp, udp.get_source(), udp.get_destination()))
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn sll_header(protocol: u16) -> Vec<u8> {
        let mut header = vec![0u8; SLL_HEADER_LEN];
        header[2..4].copy_from_slice(&1u16.to_be_bytes()); // ARPHRD_ETHER
        header[4..6].copy_from_slice(&6u16.to_be_bytes());
        header[SLL_PROTOCOL_OFFSET..].copy_from_slice(&protocol.to_be_bytes());
        header
    }

    fn transport(proto: u8, src_port: u16, dst_port: u16) -> Vec<u8> {
        let len = if proto == 6 { 20 } else { 8 };
        let mut hdr = vec![0u8; len];
        hdr[0..2].copy_from_slice(&src_port.to_be_bytes());
        hdr[2..4].copy_from_slice(&dst_port.to_be_bytes());
        if proto == 6 {
            hdr[12] = 5 << 4;
        }
        hdr
    }

    /// Build an SLL + IPv4 + TCP/UDP frame (proto 6 or 17).
    pub(crate) fn ipv4_frame(
        src: [u8; 4],
        dst: [u8; 4],
        proto: u8,
        src_port: u16,
        dst_port: u16,
    ) -> Vec<u8> {
        let l4 = transport(proto, src_port, dst_port);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&((20 + l4.len()) as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);

        let mut frame = sll_header(SLL_PROTOCOL_IPV4);
        frame.extend(ip);
        frame.extend(l4);
        frame
    }

    fn ipv6_frame(src: [u8; 16], dst: [u8; 16], proto: u8, src_port: u16, dst_port: u16) -> Vec<u8> {
        let l4 = transport(proto, src_port, dst_port);
        let mut ip = vec![0u8; 40];
        ip[0] = 0x60;
        ip[4..6].copy_from_slice(&(l4.len() as u16).to_be_bytes());
        ip[6] = proto;
        ip[7] = 64;
        ip[8..24].copy_from_slice(&src);
        ip[24..40].copy_from_slice(&dst);

        let mut frame = sll_header(SLL_PROTOCOL_IPV6);
        frame.extend(ip);
        frame.extend(l4);
        frame
    }

    fn frame(data: &[u8], orig_len: u32) -> Frame<'_> {
        Frame {
            data,
            orig_len,
            ts: 1.5,
        }
    }

    #[test]
    fn test_decode_ipv4_tcp() {
        let data = ipv4_frame([10, 0, 0, 1], [93, 184, 216, 34], 6, 5000, 80);
        let record = decode_frame(&frame(&data, 1514)).expect("tcp record");

        assert_eq!(record.src, Address::from_v4_bytes([10, 0, 0, 1]));
        assert_eq!(record.dst, Address::from_v4_bytes([93, 184, 216, 34]));
        assert_eq!(record.src_port, 5000);
        assert_eq!(record.dst_port, 80);
        assert_eq!(record.protocol, Protocol::Tcp);
        assert_eq!(record.len, 1514);
        assert_eq!(record.ts, 1.5);
    }

    #[test]
    fn test_decode_ipv4_udp() {
        let data = ipv4_frame([192, 168, 1, 2], [8, 8, 8, 8], 17, 40000, 53);
        let record = decode_frame(&frame(&data, 74)).expect("udp record");
        assert_eq!(record.protocol, Protocol::Udp);
        assert_eq!((record.src_port, record.dst_port), (40000, 53));
    }

    #[test]
    fn test_decode_ipv4_honours_header_length() {
        let mut data = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 17, 1, 2);
        // grow the IP header by one option word
        data[SLL_HEADER_LEN] = 0x46;
        data.splice(SLL_HEADER_LEN + 20..SLL_HEADER_LEN + 20, [1u8, 1, 1, 0]);
        let record = decode_frame(&frame(&data, 100)).expect("udp record");
        assert_eq!((record.src_port, record.dst_port), (1, 2));
    }

    #[test]
    fn test_decode_ipv6_tcp() {
        let mut src = [0u8; 16];
        src[0] = 0x20;
        src[1] = 0x01;
        src[15] = 1;
        let mut dst = [0u8; 16];
        dst[15] = 2;
        let data = ipv6_frame(src, dst, 6, 443, 51000);
        let record = decode_frame(&frame(&data, 90)).expect("tcp record");
        assert_eq!(record.src, Address::from_v6_bytes(src));
        assert_eq!(record.dst, Address::from_v6_bytes(dst));
        assert_eq!(record.protocol, Protocol::Tcp);
        assert_eq!((record.src_port, record.dst_port), (443, 51000));
    }

    #[test]
    fn test_decode_ipv6_udp() {
        let src: std::net::Ipv6Addr = "fe80::1c2a:9ff:fe10:4".parse().unwrap();
        let dst: std::net::Ipv6Addr = "ff02::fb".parse().unwrap();
        let data = ipv6_frame(src.octets(), dst.octets(), 17, 5353, 5353);
        let record = decode_frame(&frame(&data, 218)).expect("udp record");
        assert_eq!(record.src, Address::from(std::net::IpAddr::V6(src)));
        assert_eq!(record.dst, Address::from(std::net::IpAddr::V6(dst)));
        assert_eq!(record.protocol, Protocol::Udp);
        assert_eq!((record.src_port, record.dst_port), (5353, 5353));
        assert_eq!(record.len, 218);
    }

    #[test]
    fn test_unknown_link_protocol_is_dropped() {
        let mut data = sll_header(0x0806); // ARP
        data.extend([0u8; 28]);
        assert!(decode_frame(&frame(&data, 44)).is_none());
    }

    #[test]
    fn test_unknown_ip_protocol_is_dropped() {
        let mut data = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 6, 1, 2);
        data[SLL_HEADER_LEN + 9] = 1; // ICMP
        assert!(decode_frame(&frame(&data, 60)).is_none());
    }

    #[test]
    fn test_truncated_frames_are_dropped() {
        let data = ipv4_frame([10, 0, 0, 1], [10, 0, 0, 2], 6, 1, 2);
        for cut in [0, 10, SLL_HEADER_LEN, SLL_HEADER_LEN + 19, SLL_HEADER_LEN + 30] {
            assert!(decode_frame(&frame(&data[..cut], 60)).is_none(), "cut at {cut}");
        }
    }
}
