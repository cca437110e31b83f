//! TCP stream reassembly
//!
//! Captured packets (already dissected into addresses, ports, sequence
//! numbers and payload locations) are grouped into connections. Each
//! direction of a TCP session is its own [`Connection`] with its own ISN,
//! linked to its peer. The payload of every packet becomes a
//! [`SegmentRecord`] pointing back into the capture, and the stream layer
//! stitches those records into a linear byte stream on demand.

pub mod index;
pub mod policy;

pub use index::{IngestOutcome, ReassemblyStats, StreamReassembler};
pub use policy::{ClosePolicy, FinOrRst, FlowState, NeverClose};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// One side of a TCP conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Endpoint { ip, port }
    }

    pub(crate) fn write_key(&self, out: &mut Vec<u8>) {
        match self.ip {
            IpAddr::V4(v4) => out.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => out.extend_from_slice(&v6.octets()),
        }
        out.extend_from_slice(&self.port.to_be_bytes());
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Directed `(src, dst)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl FourTuple {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        FourTuple { src, dst }
    }

    pub fn reversed(&self) -> Self {
        FourTuple {
            src: self.dst,
            dst: self.src,
        }
    }

    /// Direction-independent key bytes; both directions produce the same key
    pub(crate) fn unordered_key(&self) -> Vec<u8> {
        let (a, b) = if self.src <= self.dst {
            (self.src, self.dst)
        } else {
            (self.dst, self.src)
        };
        let mut key = Vec::with_capacity(36);
        a.write_key(&mut key);
        b.write_key(&mut key);
        key
    }
}

/// Which side opened the flow, as observed in the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(Direction::Forward),
            "reverse" => Some(Direction::Reverse),
            _ => None,
        }
    }
}

/// One direction of a TCP session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: u64,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    /// Sequence number that maps to stream offset 0
    pub isn: u32,
    pub direction: Direction,
    /// Connection id of the opposite direction, once seen
    pub peer: Option<u64>,
}

impl Connection {
    pub fn tuple(&self) -> FourTuple {
        FourTuple::new(
            Endpoint::new(self.src_ip, self.src_port),
            Endpoint::new(self.dst_ip, self.dst_port),
        )
    }

    /// Human readable node name, e.g. `1.2.3.4-5.6.7.8/1000:80/forward`
    pub fn name(&self) -> String {
        format!(
            "{}-{}/{}:{}/{}",
            self.src_ip,
            self.dst_ip,
            self.src_port,
            self.dst_port,
            self.direction.as_str()
        )
    }
}

/// One payload-carrying packet of a connection; appended, never mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub connection_id: u64,
    pub packet_id: u64,
    pub seq: u32,
    pub length: u32,
    /// Offset of the payload bytes within the capture source
    pub packet_offset: u64,
}

impl SegmentRecord {
    /// Signed distance from `isn` with 32-bit wraparound
    pub fn relative_seq(&self, isn: u32) -> i64 {
        self.seq.wrapping_sub(isn) as i32 as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
}

/// A dissected TCP packet as handed to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub packet_id: u64,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub seq: u32,
    pub flags: TcpFlags,
    pub payload_offset: u64,
    pub payload_len: u32,
}

impl Packet {
    /// Plain data packet with no flags set
    pub fn data(
        packet_id: u64,
        src: Endpoint,
        dst: Endpoint,
        seq: u32,
        payload_offset: u64,
        payload_len: u32,
    ) -> Self {
        Packet {
            packet_id,
            src,
            dst,
            seq,
            flags: TcpFlags::default(),
            payload_offset,
            payload_len,
        }
    }

    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn tuple(&self) -> FourTuple {
        FourTuple::new(self.src, self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(a: u8, port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, a)), port)
    }

    #[test]
    fn test_unordered_key_is_symmetric() {
        let t = FourTuple::new(ep(1, 1000), ep(2, 80));
        assert_eq!(t.unordered_key(), t.reversed().unordered_key());
        assert_ne!(
            t.unordered_key(),
            FourTuple::new(ep(1, 1001), ep(2, 80)).unordered_key()
        );
    }

    #[test]
    fn test_relative_seq_wraps() {
        let seg = SegmentRecord {
            connection_id: 1,
            packet_id: 1,
            seq: 5,
            length: 10,
            packet_offset: 0,
        };
        assert_eq!(seg.relative_seq(u32::MAX - 4), 10);
        assert_eq!(seg.relative_seq(10), -5);
    }

    #[test]
    fn test_connection_name() {
        let conn = Connection {
            id: 1,
            src_ip: "1.2.3.4".parse().unwrap(),
            src_port: 1000,
            dst_ip: "5.6.7.8".parse().unwrap(),
            dst_port: 80,
            isn: 0,
            direction: Direction::Forward,
            peer: None,
        };
        assert_eq!(conn.name(), "1.2.3.4-5.6.7.8/1000:80/forward");
    }
}
