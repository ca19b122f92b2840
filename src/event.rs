//! Decoded packet events as delivered by the capture decoder.

use serde::Deserialize;

/// TCP control bits in header order (NS is bit 8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, derive_more::From)]
#[serde(transparent)]
pub struct TcpFlags(pub u16);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0b0_0000_0001);
    pub const SYN: TcpFlags = TcpFlags(0b0_0000_0010);
    pub const RST: TcpFlags = TcpFlags(0b0_0000_0100);
    pub const PSH: TcpFlags = TcpFlags(0b0_0000_1000);
    pub const ACK: TcpFlags = TcpFlags(0b0_0001_0000);
    pub const URG: TcpFlags = TcpFlags(0b0_0010_0000);
    pub const ECE: TcpFlags = TcpFlags(0b0_0100_0000);
    pub const CWR: TcpFlags = TcpFlags(0b0_1000_0000);
    pub const NS: TcpFlags = TcpFlags(0b1_0000_0000);

    pub fn contains(&self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        TcpFlags(self.0 | rhs.0)
    }
}

/// One decoded packet. Optional fields are absent when the layer carrying them is missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PacketEvent {
    /// Capture timestamp in microseconds.
    pub timestamp: u64,
    pub src_addr: String,
    pub dst_addr: String,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: String,
    pub length: u64,
    pub tcp_flags: Option<TcpFlags>,
    pub ttl: Option<u32>,
    pub tos: Option<u32>,
    pub mss: Option<u32>,
    pub win_size: Option<u32>,
    pub checksum_valid: Option<bool>,
    pub payload_length: Option<u64>,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    /// EtherType of a frame the decoder could not dissect; such events carry no addresses.
    pub ether_type: Option<u32>,
}

impl PacketEvent {
    pub fn new(
        timestamp: u64,
        src_addr: impl Into<String>,
        dst_addr: impl Into<String>,
        protocol: impl Into<String>,
        length: u64,
    ) -> Self
    {
        PacketEvent {
            timestamp,
            src_addr: src_addr.into(),
            dst_addr: dst_addr.into(),
            protocol: protocol.into(),
            length,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = Some(src_port);
        self.dst_port = Some(dst_port);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags = Some(flags);
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_tos(mut self, tos: u32) -> Self {
        self.tos = Some(tos);
        self
    }

    #[must_use]
    pub fn with_mss(mut self, mss: u32) -> Self {
        self.mss = Some(mss);
        self
    }

    #[must_use]
    pub fn with_win_size(mut self, win_size: u32) -> Self {
        self.win_size = Some(win_size);
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, valid: bool) -> Self {
        self.checksum_valid = Some(valid);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload_length: u64) -> Self {
        self.payload_length = Some(payload_length);
        self
    }

    /// Frame without a recognized network layer.
    pub fn unrecognized(
        timestamp: u64,
        src_mac: impl Into<String>,
        dst_mac: impl Into<String>,
        ether_type: u32,
        length: u64,
    ) -> Self
    {
        PacketEvent {
            timestamp,
            length,
            src_mac: Some(src_mac.into()),
            dst_mac: Some(dst_mac.into()),
            ether_type: Some(ether_type),
            ..Default::default()
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.ether_type.is_none()
    }

    #[must_use]
    pub fn with_macs(mut self, src_mac: impl Into<String>, dst_mac: impl Into<String>) -> Self {
        self.src_mac = Some(src_mac.into());
        self.dst_mac = Some(dst_mac.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_contains() {
        let syn_ack = TcpFlags::SYN | TcpFlags::ACK;
        assert!(syn_ack.contains(TcpFlags::SYN));
        assert!(syn_ack.contains(TcpFlags::ACK));
        assert!(!syn_ack.contains(TcpFlags::FIN));
        assert_ne!(syn_ack, TcpFlags::SYN);
        assert_eq!(TcpFlags::from(0x10u16), TcpFlags::ACK);
    }

    #[test]
    fn test_deserialize_csv_row() {
        let data = "\
timestamp,src_addr,dst_addr,src_port,dst_port,protocol,length,tcp_flags,ttl,tos,mss,win_size,checksum_valid,payload_length,src_mac,dst_mac
1000,10.0.0.1,10.0.0.2,1234,80,TCP,60,2,64,0,1460,64240,true,0,aa:bb:cc:dd:ee:01,aa:bb:cc:dd:ee:02
2000,10.0.0.2,10.0.0.1,,,ICMP,98,,64,,,,,56,,
";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let events = reader.deserialize::<PacketEvent>()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tcp_flags, Some(TcpFlags::SYN));
        assert_eq!(events[0].mss, Some(1460));
        assert_eq!(events[0].checksum_valid, Some(true));
        assert_eq!(events[1].src_port, None);
        assert_eq!(events[1].tcp_flags, None);
        assert_eq!(events[1].payload_length, Some(56));
        assert_eq!(events[1].src_mac, None);
    }
}
