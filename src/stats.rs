//! Per-address and per-value aggregates, updated one decoded packet at a time.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use chrono::{TimeZone, Utc};
use derivative::Derivative;
use strum_macros::{Display, EnumIter};
use tracing::debug;

use crate::*;
use crate::anomaly::{AnomalyScorer, Role};
use crate::config::WindowStart;
use crate::error::{Result, StatsError};

pub const KBYTE: f64 = 1024.0;
pub const MICROS: f64 = 1_000_000.0;

/// Header fields tracked as value distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum FieldKind {
    Ttl,
    Tos,
    Mss,
    WinSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum AddressClass {
    A,
    B,
    C,
    D,
    E,
    #[default]
    #[strum(serialize = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpClass {
    pub class: AddressClass,
    pub private: bool,
}

impl IpClass {
    /// Classful network from the first octet, private ranges from the first two.
    pub fn of(address: &str) -> IpClass {
        let ip = match address.parse::<Ipv4Addr>() {
            Ok(ip) => ip,
            Err(_) => return IpClass::default(),
        };
        let class = match ip.octets()[0] {
            0..=127 => AddressClass::A,
            128..=191 => AddressClass::B,
            192..=223 => AddressClass::C,
            224..=239 => AddressClass::D,
            240..=255 => AddressClass::E,
        };
        IpClass { class, private: ip.is_private() }
    }
}

impl std::fmt::Display for IpClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.private {
            write!(f, "{}-private", self.class)
        } else {
            write!(f, "{}", self.class)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpCounts {
    pub sent: u64,
    pub received: u64,
}

/// Gaps between consecutive samples, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Latency {
    pub min: u64,
    pub max: u64,
    pub avg: u64,
}

impl Latency {
    pub fn of_gaps(gaps: &[u64]) -> Latency {
        if gaps.is_empty() {
            return Latency::default();
        }
        Latency {
            min: gaps.iter().copied().min().unwrap_or(0),
            max: gaps.iter().copied().max().unwrap_or(0),
            avg: gaps.iter().sum::<u64>() / gaps.len() as u64,
        }
    }
}

/// Per-address figures relative to the capture duration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IpDerived {
    pub bandwidth_kbit_in: f64,
    pub bandwidth_kbit_out: f64,
    pub packets_per_second_in: f64,
    pub packets_per_second_out: f64,
    pub avg_kbytes_sent: f64,
    pub avg_kbytes_received: f64,
}

fn ratio(value: f64, divisor: f64) -> f64 {
    if divisor == 0.0 { 0.0 } else { value / divisor }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateExtremes {
    pub min: f64,
    pub max: f64,
}

impl RateExtremes {
    fn fold(extremes: &mut Option<RateExtremes>, rate: f64) {
        let next = match *extremes {
            Some(RateExtremes { min, max }) => RateExtremes { min: min.min(rate), max: max.max(rate) },
            None => RateExtremes { min: rate, max: rate },
        };
        *extremes = Some(next);
    }
}

#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct IpStatEntry {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    #[derivative(Debug = "ignore")]
    sent: Vec<Sample>,
    #[derivative(Debug = "ignore")]
    received: Vec<Sample>,
    pub class: IpClass,
    pub in_degree: u64,
    pub out_degree: u64,
    pub overall_degree: u64,
    /// `None` until the address has been through a rate-tracked interval.
    pub interval_pkt_rate: Option<RateExtremes>,
    pub interval_kbyte_rate: Option<RateExtremes>,
    pub first_sent_index: Option<u64>,
    pub first_received_index: Option<u64>,
    pub sender_score: f64,
    pub receiver_score: f64,
}

impl IpStatEntry {
    pub fn new(class: IpClass) -> Self {
        IpStatEntry { class, ..default() }
    }

    pub fn pkts_sent(&self) -> u64 {
        self.sent.len() as u64
    }

    pub fn pkts_received(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn sent_samples(&self) -> &[Sample] {
        &self.sent
    }

    pub fn received_samples(&self) -> &[Sample] {
        &self.received
    }

    pub fn counts(&self) -> IpCounts {
        IpCounts { sent: self.pkts_sent(), received: self.pkts_received() }
    }

    pub fn kbytes_sent(&self) -> f64 {
        self.bytes_sent as f64 / KBYTE
    }

    pub fn kbytes_received(&self) -> f64 {
        self.bytes_received as f64 / KBYTE
    }

    pub fn anomaly_score(&self) -> f64 {
        self.sender_score.max(self.receiver_score)
    }

    fn push_sent(&mut self, timestamp: u64, size: u64) {
        self.bytes_sent += size;
        self.sent.push(Sample { timestamp, size });
    }

    fn push_received(&mut self, timestamp: u64, size: u64) {
        self.bytes_received += size;
        self.received.push(Sample { timestamp, size });
    }

    /// Packets and bytes sent in the window opening at `start`.
    pub fn sent_window(&self, start: u64, after_boundary: bool, mode: WindowStart) -> (u64, u64) {
        let first = mode.first_index(&self.sent, start, after_boundary);
        self.sent.get(first..)
            .map(|window| (window.len() as u64, window.iter().map(|s| s.size).sum()))
            .unwrap_or((0, 0))
    }

    /// Folds one interval's rates into the running extremes.
    pub fn update_interval_rates(&mut self, pkt_rate: f64, kbyte_rate: f64) {
        RateExtremes::fold(&mut self.interval_pkt_rate, pkt_rate);
        RateExtremes::fold(&mut self.interval_kbyte_rate, kbyte_rate);
    }

    pub fn latency(&self) -> Latency {
        let gaps = self.sent.windows(2)
            .map(|w| w[1].timestamp.saturating_sub(w[0].timestamp))
            .collect::<Vec<_>>();
        Latency::of_gaps(&gaps)
    }

    pub fn derived(&self, duration_s: f64) -> IpDerived {
        IpDerived {
            bandwidth_kbit_in: ratio(self.kbytes_received(), duration_s) * 8.0,
            bandwidth_kbit_out: ratio(self.kbytes_sent(), duration_s) * 8.0,
            packets_per_second_in: ratio(self.pkts_received() as f64, duration_s),
            packets_per_second_out: ratio(self.pkts_sent() as f64, duration_s),
            avg_kbytes_sent: ratio(self.kbytes_sent(), self.pkts_sent() as f64),
            avg_kbytes_received: ratio(self.kbytes_received(), self.pkts_received() as f64),
        }
    }
}

/// Global value→count map plus the per-(address, value) breakdown.
#[derive(Debug, Clone, Default)]
pub struct ValueDistribution {
    pub values: Table<u32, u64>,
    pub per_address: Table<(String, u32), u64>,
}

impl ValueDistribution {
    pub fn record(&mut self, address: &str, value: u32) {
        self.values.increment(value);
        self.per_address.increment((address.to_string(), value));
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountBytes {
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortKey {
    pub address: String,
    pub direction: PortDirection,
    pub port: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PduKey {
    pub src_mac: String,
    pub dst_mac: String,
    pub ether_type: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PduStat {
    pub count: u64,
    pub last_seen: u64,
}

/// Scalar counters diffed at every interval boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Delta)]
pub struct ScalarCounters {
    pub packets: u64,
    pub bytes: u64,
    pub payload: u64,
    pub correct_checksums: u64,
    pub incorrect_checksums: u64,
}

/// Number of distinct keys per distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Delta)]
pub struct DistinctCounts {
    pub ip: u64,
    pub ttl: u64,
    pub win_size: u64,
    pub tos: u64,
    pub mss: u64,
    pub port: u64,
}

/// The whole-capture summary row.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub packet_count: u64,
    pub capture_duration_s: f64,
    pub capture_duration: String,
    pub first_packet: String,
    pub last_packet: String,
    pub avg_packet_rate: f64,
    pub avg_packet_size_kbytes: f64,
    pub avg_packets_sent_per_host: f64,
    pub avg_bandwidth_in_kbit: f64,
    pub avg_bandwidth_out_kbit: f64,
    pub extended_signals: bool,
}

/// `YYYY-mm-dd HH:MM:SS.mmmmmm` in UTC.
pub fn format_timestamp(timestamp_us: u64) -> String {
    let secs = (timestamp_us / 1_000_000) as i64;
    let nanos = (timestamp_us % 1_000_000) as u32 * 1_000;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_default()
}

/// `HH:MM:SS.mmmmmm`.
pub fn format_duration(duration_us: u64) -> String {
    let micros = duration_us % 1_000_000;
    let secs = duration_us / 1_000_000;
    format!("{:02}:{:02}:{:02}.{:06}", secs / 3600, secs % 3600 / 60, secs % 60, micros)
}

#[derive(Debug, Default)]
pub struct StatisticsAccumulator {
    extended: bool,
    ips: Table<String, IpStatEntry>,
    contacted: Table<String, HashSet<String>>,
    scorer: AnomalyScorer,
    ttl: ValueDistribution,
    tos: ValueDistribution,
    mss: ValueDistribution,
    win_size: ValueDistribution,
    port_values: Table<u16, u64>,
    ports: Table<PortKey, CountBytes>,
    protocols: Table<(String, String), CountBytes>,
    macs: Table<String, String>,
    unrecognized: Table<PduKey, PduStat>,
    counters: ScalarCounters,
    first_timestamp: Option<u64>,
    last_timestamp: Option<u64>,
}

impl StatisticsAccumulator {
    pub fn new(extended_signals: bool) -> Self {
        StatisticsAccumulator { extended: extended_signals, ..default() }
    }

    pub fn extended_signals(&self) -> bool {
        self.extended
    }

    /// Advances the global packet and byte counters and the capture time span.
    pub fn count_packet(&mut self, length: u64, timestamp: u64) {
        self.counters.packets += 1;
        self.counters.bytes += length;
        self.first_timestamp.get_or_insert(timestamp);
        self.last_timestamp = Some(timestamp);
    }

    /// Counts the packet and attributes it to both endpoints.
    pub fn record_packet(&mut self, sender: &str, receiver: &str, length: u64, timestamp: u64) {
        self.count_packet(length, timestamp);
        let packets = self.counters.packets;

        let entry = self.ips.entry(sender.to_string())
            .or_insert_with(|| IpStatEntry::new(IpClass::of(sender)));
        if entry.pkts_sent() == 0 {
            entry.first_sent_index = Some(packets);
            if self.extended {
                entry.sender_score = self.scorer.first_appearance(Role::Sender, packets);
            }
        }
        entry.push_sent(timestamp, length);

        let entry = self.ips.entry(receiver.to_string())
            .or_insert_with(|| IpStatEntry::new(IpClass::of(receiver)));
        if entry.pkts_received() == 0 {
            entry.first_received_index = Some(packets);
            if self.extended {
                entry.receiver_score = self.scorer.first_appearance(Role::Receiver, packets);
            }
        }
        entry.push_received(timestamp, length);

        if self.extended {
            self.update_degrees(sender, receiver);
        }
    }

    fn update_degrees(&mut self, sender: &str, receiver: &str) {
        let reverse_seen = self.contacted.get(receiver)
            .map(|peers| peers.contains(sender))
            .unwrap_or(false);
        let first_in_direction = self.contacted.get_or_insert_default(sender.to_string())
            .insert(receiver.to_string());
        if !first_in_direction {
            return;
        }
        let new_peer = !reverse_seen;
        if let Some(entry) = self.ips.get_mut(sender) {
            entry.out_degree += 1;
            if new_peer { entry.overall_degree += 1 }
        }
        if let Some(entry) = self.ips.get_mut(receiver) {
            entry.in_degree += 1;
            if new_peer && sender != receiver { entry.overall_degree += 1 }
        }
    }

    pub fn record_transport_checksum(&mut self, valid: bool) {
        if !self.extended {
            return;
        }
        if valid {
            self.counters.correct_checksums += 1;
        } else {
            self.counters.incorrect_checksums += 1;
        }
    }

    pub fn record_payload_presence(&mut self, payload_length: u64) {
        if self.extended && payload_length > 0 {
            self.counters.payload += 1;
        }
    }

    pub fn record_field_value(&mut self, kind: FieldKind, address: &str, value: u32) {
        self.field_mut(kind).record(address, value);
    }

    pub fn record_port(&mut self, sender: &str, out_port: u16, receiver: &str, in_port: u16, protocol: &str) {
        self.port_values.increment(out_port);
        self.port_values.increment(in_port);
        self.port_entry(sender, PortDirection::Out, out_port, protocol).count += 1;
        self.port_entry(receiver, PortDirection::In, in_port, protocol).count += 1;
    }

    pub fn record_port_bytes(
        &mut self,
        sender: &str, out_port: u16,
        receiver: &str, in_port: u16,
        protocol: &str,
        bytes: u64,
    )
    {
        self.port_entry(sender, PortDirection::Out, out_port, protocol).bytes += bytes;
        self.port_entry(receiver, PortDirection::In, in_port, protocol).bytes += bytes;
    }

    fn port_entry(&mut self, address: &str, direction: PortDirection, port: u16, protocol: &str) -> &mut CountBytes {
        self.ports.get_or_insert_default(PortKey {
            address: address.to_string(),
            direction,
            port,
            protocol: protocol.to_string(),
        })
    }

    pub fn record_protocol(&mut self, address: &str, protocol: &str, length: u64) {
        let entry = self.protocols.get_or_insert_default((address.to_string(), protocol.to_string()));
        entry.count += 1;
        entry.bytes += length;
    }

    pub fn record_unrecognized_pdu(&mut self, src_mac: &str, dst_mac: &str, ether_type: u32, timestamp: u64) {
        let key = PduKey { src_mac: src_mac.to_string(), dst_mac: dst_mac.to_string(), ether_type };
        let stat = self.unrecognized.get_or_insert_default(key);
        stat.count += 1;
        stat.last_seen = timestamp;
        debug!(src_mac, dst_mac, ether_type, count = stat.count, "unrecognized pdu");
    }

    pub fn assign_mac(&mut self, address: &str, mac: &str) {
        self.macs.insert(address.to_string(), mac.to_string());
    }

    pub fn field(&self, kind: FieldKind) -> &ValueDistribution {
        match kind {
            FieldKind::Ttl => &self.ttl,
            FieldKind::Tos => &self.tos,
            FieldKind::Mss => &self.mss,
            FieldKind::WinSize => &self.win_size,
        }
    }

    fn field_mut(&mut self, kind: FieldKind) -> &mut ValueDistribution {
        match kind {
            FieldKind::Ttl => &mut self.ttl,
            FieldKind::Tos => &mut self.tos,
            FieldKind::Mss => &mut self.mss,
            FieldKind::WinSize => &mut self.win_size,
        }
    }

    pub fn ip(&self, address: &str) -> Option<&IpStatEntry> {
        self.ips.get(address)
    }

    pub fn ips(&self) -> &Table<String, IpStatEntry> {
        &self.ips
    }

    pub(crate) fn ips_mut(&mut self) -> &mut Table<String, IpStatEntry> {
        &mut self.ips
    }

    pub fn port_values(&self) -> &Table<u16, u64> {
        &self.port_values
    }

    pub fn ports(&self) -> &Table<PortKey, CountBytes> {
        &self.ports
    }

    pub fn protocols(&self) -> &Table<(String, String), CountBytes> {
        &self.protocols
    }

    pub fn protocol_count(&self, address: &str, protocol: &str) -> CountBytes {
        self.protocols.get(&(address.to_string(), protocol.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn macs(&self) -> &Table<String, String> {
        &self.macs
    }

    pub fn unrecognized_pdus(&self) -> &Table<PduKey, PduStat> {
        &self.unrecognized
    }

    pub fn counters(&self) -> ScalarCounters {
        self.counters
    }

    pub fn distinct_counts(&self) -> DistinctCounts {
        DistinctCounts {
            ip: self.ips.len() as u64,
            ttl: self.ttl.values.len() as u64,
            win_size: self.win_size.values.len() as u64,
            tos: self.tos.values.len() as u64,
            mss: self.mss.values.len() as u64,
            port: self.port_values.len() as u64,
        }
    }

    pub fn packet_count(&self) -> u64 {
        self.counters.packets
    }

    pub fn first_timestamp(&self) -> Option<u64> {
        self.first_timestamp
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }

    pub fn avg_packet_size_kbytes(&self) -> f64 {
        ratio(self.counters.bytes as f64, self.counters.packets as f64) / KBYTE
    }

    pub fn capture_duration_us(&self) -> u64 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }

    pub fn capture_duration_s(&self) -> f64 {
        self.capture_duration_us() as f64 / MICROS
    }

    pub fn summary(&self) -> Result<CaptureSummary> {
        let packets = self.counters.packets;
        if packets == 0 {
            return Err(StatsError::NoPackets);
        }
        if self.ips.is_empty() {
            return Err(StatsError::NoSenders(packets));
        }
        let duration = self.capture_duration_s();
        let hosts = self.ips.len() as f64;
        let sent: u64 = self.ips.values().map(|e| e.pkts_sent()).sum();
        let bandwidth_in: f64 = self.ips.values().map(|e| ratio(e.kbytes_received(), duration)).sum();
        let bandwidth_out: f64 = self.ips.values().map(|e| ratio(e.kbytes_sent(), duration)).sum();
        Ok(CaptureSummary {
            packet_count: packets,
            capture_duration_s: duration,
            capture_duration: format_duration(self.capture_duration_us()),
            first_packet: self.first_timestamp.map(format_timestamp).unwrap_or_default(),
            last_packet: self.last_timestamp.map(format_timestamp).unwrap_or_default(),
            avg_packet_rate: ratio(packets as f64, duration),
            avg_packet_size_kbytes: self.avg_packet_size_kbytes(),
            avg_packets_sent_per_host: sent as f64 / hosts,
            avg_bandwidth_in_kbit: bandwidth_in / hosts * 8.0,
            avg_bandwidth_out_kbit: bandwidth_out / hosts * 8.0,
            extended_signals: self.extended,
        })
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    const A: &str = "192.168.0.1";
    const B: &str = "10.0.0.2";
    const C: &str = "8.8.8.8";

    #[test]
    fn test_first_packet_counts_and_degrees() {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_packet(A, B, 100, 1_000);
        let a = stats.ip(A).unwrap();
        let b = stats.ip(B).unwrap();
        assert_eq!(a.pkts_sent(), 1);
        assert_eq!(a.pkts_received(), 0);
        assert_eq!(b.pkts_received(), 1);
        assert_eq!((a.out_degree, a.in_degree, a.overall_degree), (1, 0, 1));
        assert_eq!((b.out_degree, b.in_degree, b.overall_degree), (0, 1, 1));
        assert_eq!(a.sender_score, 1.0);
        assert_eq!(b.receiver_score, 1.0);
        assert_eq!(a.first_sent_index, Some(1));
        assert_eq!(b.first_received_index, Some(1));
        assert_eq!(a.first_received_index, None);
    }

    #[test]
    fn test_reply_does_not_raise_overall_degree() {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_packet(A, B, 100, 1_000);
        stats.record_packet(B, A, 60, 2_000);
        stats.record_packet(A, B, 100, 3_000);
        let a = stats.ip(A).unwrap();
        let b = stats.ip(B).unwrap();
        assert_eq!((a.out_degree, a.in_degree, a.overall_degree), (1, 1, 1));
        assert_eq!((b.out_degree, b.in_degree, b.overall_degree), (1, 1, 1));

        stats.record_packet(A, C, 10, 4_000);
        let a = stats.ip(A).unwrap();
        assert_eq!((a.out_degree, a.overall_degree), (2, 2));
    }

    #[test]
    fn test_counters_match_sample_sequences() {
        let mut stats = StatisticsAccumulator::new(false);
        for (i, (s, r)) in [(A, B), (B, A), (A, C), (C, A), (A, A)].iter().enumerate() {
            stats.record_packet(s, r, 10 * (i as u64 + 1), i as u64);
        }
        for entry in stats.ips().values() {
            assert_eq!(entry.pkts_sent() as usize, entry.sent_samples().len());
            assert_eq!(entry.pkts_received() as usize, entry.received_samples().len());
            assert_eq!(entry.bytes_sent, entry.sent_samples().iter().map(|s| s.size).sum::<u64>());
        }
        let a = stats.ip(A).unwrap();
        assert_eq!(a.pkts_sent(), 3);
        assert_eq!(a.pkts_received(), 3);
        assert_eq!(stats.packet_count(), 5);
        assert_eq!(stats.counters().bytes, 150);
    }

    #[test]
    fn test_extended_gate() {
        let mut stats = StatisticsAccumulator::new(false);
        stats.record_packet(A, B, 100, 1_000);
        stats.record_transport_checksum(false);
        stats.record_payload_presence(20);
        let a = stats.ip(A).unwrap();
        assert_eq!(a.out_degree, 0);
        assert_eq!(a.sender_score, 0.0);
        assert_eq!(stats.counters().incorrect_checksums, 0);
        assert_eq!(stats.counters().payload, 0);

        let mut stats = StatisticsAccumulator::new(true);
        stats.record_transport_checksum(false);
        stats.record_transport_checksum(true);
        stats.record_transport_checksum(true);
        stats.record_payload_presence(0);
        stats.record_payload_presence(12);
        let counters = stats.counters();
        assert_eq!((counters.correct_checksums, counters.incorrect_checksums, counters.payload), (2, 1, 1));
    }

    #[test]
    fn test_ip_class() {
        assert_eq!(IpClass::of("10.1.2.3").to_string(), "A-private");
        assert_eq!(IpClass::of("8.8.8.8").to_string(), "A");
        assert_eq!(IpClass::of("172.16.0.1").to_string(), "B-private");
        assert_eq!(IpClass::of("172.32.0.1").to_string(), "B");
        assert_eq!(IpClass::of("192.168.1.1").to_string(), "C-private");
        assert_eq!(IpClass::of("224.0.0.251").to_string(), "D");
        assert_eq!(IpClass::of("250.0.0.1").to_string(), "E");
        assert_eq!(IpClass::of("fe80::1").to_string(), "unknown");
    }

    #[test]
    fn test_field_and_port_distributions() {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_field_value(FieldKind::Ttl, A, 64);
        stats.record_field_value(FieldKind::Ttl, A, 64);
        stats.record_field_value(FieldKind::Ttl, B, 128);
        assert_eq!(stats.field(FieldKind::Ttl).values.count(&64), 2);
        assert_eq!(stats.field(FieldKind::Ttl).per_address.count(&(A.to_string(), 64)), 2);
        assert_eq!(stats.field(FieldKind::Ttl).per_address.count(&(B.to_string(), 64)), 0);
        for kind in FieldKind::iter().filter(|&k| k != FieldKind::Ttl) {
            assert!(stats.field(kind).values.is_empty());
        }

        stats.record_port(A, 50000, B, 443, "TCP");
        stats.record_port_bytes(A, 50000, B, 443, "TCP", 1500);
        stats.record_port(B, 443, A, 50000, "TCP");
        assert_eq!(stats.port_values().count(&443), 2);
        assert_eq!(stats.port_values().count(&50000), 2);
        let out = PortKey { address: A.into(), direction: PortDirection::Out, port: 50000, protocol: "TCP".into() };
        assert_eq!(stats.ports()[&out], CountBytes { count: 1, bytes: 1500 });
        assert_eq!(stats.distinct_counts().port, 2);
        assert_eq!(stats.distinct_counts().ttl, 2);
    }

    #[test]
    fn test_protocol_and_pdu_tables() {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_protocol(A, "UDP", 80);
        stats.record_protocol(A, "UDP", 20);
        assert_eq!(stats.protocol_count(A, "UDP"), CountBytes { count: 2, bytes: 100 });
        assert_eq!(stats.protocol_count(A, "TCP"), CountBytes::default());

        stats.record_unrecognized_pdu("aa", "bb", 0x88cc, 10);
        stats.record_unrecognized_pdu("aa", "bb", 0x88cc, 30);
        let key = PduKey { src_mac: "aa".into(), dst_mac: "bb".into(), ether_type: 0x88cc };
        assert_eq!(stats.unrecognized_pdus()[&key], PduStat { count: 2, last_seen: 30 });

        stats.assign_mac(A, "aa");
        stats.assign_mac(A, "cc");
        assert_eq!(stats.macs()[A], "cc");
    }

    #[test]
    fn test_rate_extremes_keep_observed_zero() {
        let mut entry = IpStatEntry::default();
        assert_eq!(entry.interval_pkt_rate, None);
        entry.update_interval_rates(5.0, 2.0);
        assert_eq!(entry.interval_pkt_rate, Some(RateExtremes { min: 5.0, max: 5.0 }));
        entry.update_interval_rates(3.0, 4.0);
        entry.update_interval_rates(0.0, 0.0);
        entry.update_interval_rates(9.0, 1.0);
        assert_eq!(entry.interval_pkt_rate, Some(RateExtremes { min: 0.0, max: 9.0 }));
        assert_eq!(entry.interval_kbyte_rate, Some(RateExtremes { min: 0.0, max: 4.0 }));
    }

    #[test]
    fn test_sent_window_and_latency() {
        let mut stats = StatisticsAccumulator::new(false);
        for ts in [100, 250, 300, 700] {
            stats.record_packet(A, B, 10, ts);
        }
        let a = stats.ip(A).unwrap();
        assert_eq!(a.sent_window(250, false, WindowStart::AtOrAfter), (3, 30));
        assert_eq!(a.sent_window(250, true, WindowStart::AtOrAfter), (2, 20));
        assert_eq!(a.sent_window(800, false, WindowStart::AtOrAfter), (0, 0));
        assert_eq!(a.sent_window(200, false, WindowStart::Closest), (3, 30));
        assert_eq!(a.latency(), Latency { min: 50, max: 400, avg: 200 });
        assert_eq!(stats.ip(B).unwrap().latency(), Latency::default());
    }

    #[test]
    fn test_summary_requires_packets() {
        let stats = StatisticsAccumulator::new(true);
        assert!(matches!(stats.summary(), Err(StatsError::NoPackets)));
        assert_eq!(stats.avg_packet_size_kbytes(), 0.0);

        let mut stats = StatisticsAccumulator::new(true);
        stats.count_packet(60, 5);
        assert!(matches!(stats.summary(), Err(StatsError::NoSenders(1))));
    }

    #[test]
    fn test_summary_values() {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_packet(A, B, 1024, 1_000_000);
        stats.record_packet(B, A, 1024, 3_000_000);
        let summary = stats.summary().unwrap();
        assert_eq!(summary.packet_count, 2);
        assert_eq!(summary.capture_duration_s, 2.0);
        assert_eq!(summary.capture_duration, "00:00:02.000000");
        assert_eq!(summary.first_packet, "1970-01-01 00:00:01.000000");
        assert_eq!(summary.avg_packet_rate, 1.0);
        assert_eq!(summary.avg_packet_size_kbytes, 1.0);
        assert_eq!(summary.avg_packets_sent_per_host, 1.0);
        // each host receives 1 kbyte over 2 s
        assert_eq!(summary.avg_bandwidth_in_kbit, 4.0);
    }

    #[test]
    fn test_derived_guards_zero_duration() {
        let mut stats = StatisticsAccumulator::new(false);
        stats.record_packet(A, B, 2048, 10);
        let derived = stats.ip(A).unwrap().derived(0.0);
        assert_eq!(derived.bandwidth_kbit_out, 0.0);
        assert_eq!(derived.avg_kbytes_sent, 2.0);
        assert_eq!(derived.avg_kbytes_received, 0.0);
        assert_eq!(format_duration(3_723_000_042), "01:02:03.000042");
    }
}
