//! Flat records handed to the persistence sink, one struct per table.

use serde::Serialize;
use strum::IntoEnumIterator;

use crate::*;
use crate::conversation::{ConvEntry, ConvKey, ExtConvEntry, ExtConvKey};
use crate::entropy::{CumulativeIpEntropy, EntropySet};
use crate::interval::IntervalStat;
use crate::sink::StatsSink;
use crate::stats::{format_timestamp, FieldKind, IpStatEntry, ValueDistribution};

/// Stand-in for values that are undefined, such as a round-trip time without samples.
pub const UNDEFINED: f64 = -1.0;

pub const IP_STATISTICS: &str = "ip_statistics";
pub const IP_PORTS: &str = "ip_ports";
pub const IP_PROTOCOLS: &str = "ip_protocols";
pub const IP_MAC: &str = "ip_mac";
pub const FILE_STATISTICS: &str = "file_statistics";
pub const CONV_STATISTICS: &str = "conv_statistics";
pub const CONV_STATISTICS_EXTENDED: &str = "conv_statistics_extended";
pub const INTERVAL_TABLES: &str = "interval_tables";
pub const UNRECOGNIZED_PDUS: &str = "unrecognized_pdus";

pub fn field_table(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Ttl => "ip_ttl",
        FieldKind::Tos => "ip_tos",
        FieldKind::Mss => "tcp_mss",
        FieldKind::WinSize => "tcp_win",
    }
}

pub fn interval_table(length: u64) -> String {
    format!("interval_statistics_{}", length)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpRow {
    pub ip_address: String,
    pub pkts_received: u64,
    pub pkts_sent: u64,
    pub kbytes_received: f64,
    pub kbytes_sent: f64,
    pub max_pkt_rate: f64,
    pub min_pkt_rate: f64,
    pub max_kbyte_rate: f64,
    pub min_kbyte_rate: f64,
    pub max_latency: u64,
    pub min_latency: u64,
    pub avg_latency: u64,
    pub ip_class: String,
    pub in_degree: u64,
    pub out_degree: u64,
    pub overall_degree: u64,
    pub first_sent_index: Option<u64>,
    pub first_received_index: Option<u64>,
    pub anomaly_score: f64,
    pub bandwidth_kbit_in: f64,
    pub bandwidth_kbit_out: f64,
    pub pkts_per_second_in: f64,
    pub pkts_per_second_out: f64,
    pub avg_kbytes_sent: f64,
    pub avg_kbytes_received: f64,
}

impl IpRow {
    pub fn new(address: &str, entry: &IpStatEntry, duration_s: f64) -> Self {
        let latency = entry.latency();
        let derived = entry.derived(duration_s);
        IpRow {
            ip_address: address.to_string(),
            pkts_received: entry.pkts_received(),
            pkts_sent: entry.pkts_sent(),
            kbytes_received: entry.kbytes_received(),
            kbytes_sent: entry.kbytes_sent(),
            max_pkt_rate: entry.interval_pkt_rate.map_or(0.0, |r| r.max),
            min_pkt_rate: entry.interval_pkt_rate.map_or(0.0, |r| r.min),
            max_kbyte_rate: entry.interval_kbyte_rate.map_or(0.0, |r| r.max),
            min_kbyte_rate: entry.interval_kbyte_rate.map_or(0.0, |r| r.min),
            max_latency: latency.max,
            min_latency: latency.min,
            avg_latency: latency.avg,
            ip_class: entry.class.to_string(),
            in_degree: entry.in_degree,
            out_degree: entry.out_degree,
            overall_degree: entry.overall_degree,
            first_sent_index: entry.first_sent_index,
            first_received_index: entry.first_received_index,
            anomaly_score: entry.anomaly_score(),
            bandwidth_kbit_in: derived.bandwidth_kbit_in,
            bandwidth_kbit_out: derived.bandwidth_kbit_out,
            pkts_per_second_in: derived.packets_per_second_in,
            pkts_per_second_out: derived.packets_per_second_out,
            avg_kbytes_sent: derived.avg_kbytes_sent,
            avg_kbytes_received: derived.avg_kbytes_received,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldValueRow {
    pub ip_address: String,
    pub value: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortRow {
    pub ip_address: String,
    pub port_direction: String,
    pub port_number: u16,
    pub port_count: u64,
    pub byte_count: u64,
    pub port_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolRow {
    pub ip_address: String,
    pub protocol_name: String,
    pub protocol_count: u64,
    pub byte_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpMacRow {
    pub ip_address: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub packet_count: u64,
    pub capture_duration: String,
    pub timestamp_first_packet: String,
    pub timestamp_last_packet: String,
    pub avg_packet_rate: f64,
    pub avg_packet_size: f64,
    pub avg_packets_sent_per_host: f64,
    pub avg_bandwidth_in: f64,
    pub avg_bandwidth_out: f64,
    pub do_extra_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvRow {
    pub ip_address_a: String,
    pub port_a: u16,
    pub ip_address_b: String,
    pub port_b: u16,
    pub pkts_count: u64,
    pub avg_pkt_rate: f64,
    pub avg_delay: u64,
    pub min_delay: u64,
    pub max_delay: u64,
    pub round_trip_time: f64,
}

impl ConvRow {
    pub fn new(key: &ConvKey, entry: &ConvEntry) -> Self {
        ConvRow {
            ip_address_a: key.addr_a.clone(),
            port_a: key.port_a,
            ip_address_b: key.addr_b.clone(),
            port_b: key.port_b,
            pkts_count: entry.pkts_count,
            avg_pkt_rate: entry.avg_pkt_rate,
            avg_delay: entry.delays.avg,
            min_delay: entry.delays.min,
            max_delay: entry.delays.max,
            round_trip_time: entry.round_trip_time.unwrap_or(UNDEFINED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtConvRow {
    pub ip_address_a: String,
    pub port_a: u16,
    pub ip_address_b: String,
    pub port_b: u16,
    pub protocol: String,
    pub pkts_count: u64,
    pub avg_pkt_rate: f64,
    pub avg_delay: u64,
    pub min_delay: u64,
    pub max_delay: u64,
    pub avg_interval_pkt_count: f64,
    pub avg_time_between_intervals: f64,
    pub avg_interval_time: f64,
    pub total_conversation_duration: f64,
}

impl ExtConvRow {
    pub fn new(key: &ExtConvKey, entry: &ExtConvEntry) -> Self {
        ExtConvRow {
            ip_address_a: key.endpoints.addr_a.clone(),
            port_a: key.endpoints.port_a,
            ip_address_b: key.endpoints.addr_b.clone(),
            port_b: key.endpoints.port_b,
            protocol: key.protocol.clone(),
            pkts_count: entry.pkts_count,
            avg_pkt_rate: entry.avg_pkt_rate,
            avg_delay: entry.delays.avg,
            min_delay: entry.delays.min,
            max_delay: entry.delays.max,
            avg_interval_pkt_count: entry.avg_int_pkts_count,
            avg_time_between_intervals: entry.avg_time_between_ints,
            avg_interval_time: entry.avg_interval_time,
            total_conversation_duration: entry.total_comm_duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalTableRow {
    pub name: String,
    pub is_default: bool,
    pub extra_tests: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntervalRow {
    pub last_pkt_timestamp: u64,
    pub first_pkt_timestamp: u64,
    pub interval_length: u64,
    pub pkts_count: u64,
    pub pkt_rate: f64,
    pub kbytes: f64,
    pub kbyte_rate: f64,
    pub payload_count: u64,
    pub incorrect_checksum_count: u64,
    pub correct_checksum_count: u64,
    pub ip_novel_count: u64,
    pub ip_src_novel_count: i64,
    pub ip_dst_novel_count: i64,
    pub port_novel_count: u64,
    pub ttl_novel_count: u64,
    pub win_size_novel_count: u64,
    pub tos_novel_count: u64,
    pub mss_novel_count: u64,
    pub port_entropy: f64,
    pub ttl_entropy: f64,
    pub win_size_entropy: f64,
    pub tos_entropy: f64,
    pub mss_entropy: f64,
    pub port_novel_entropy: f64,
    pub ttl_novel_entropy: f64,
    pub win_size_novel_entropy: f64,
    pub tos_novel_entropy: f64,
    pub mss_novel_entropy: f64,
    pub port_entropy_normalized: f64,
    pub ttl_entropy_normalized: f64,
    pub win_size_entropy_normalized: f64,
    pub tos_entropy_normalized: f64,
    pub mss_entropy_normalized: f64,
    pub port_novel_entropy_normalized: f64,
    pub ttl_novel_entropy_normalized: f64,
    pub win_size_novel_entropy_normalized: f64,
    pub tos_novel_entropy_normalized: f64,
    pub mss_novel_entropy_normalized: f64,
    pub ip_src_entropy: f64,
    pub ip_dst_entropy: f64,
    pub ip_src_entropy_normalized: f64,
    pub ip_dst_entropy_normalized: f64,
    pub ip_src_novel_entropy: f64,
    pub ip_dst_novel_entropy: f64,
    pub ip_src_novel_entropy_normalized: f64,
    pub ip_dst_novel_entropy_normalized: f64,
    pub ip_src_cum_entropy: f64,
    pub ip_dst_cum_entropy: f64,
    pub ip_src_cum_entropy_normalized: f64,
    pub ip_dst_cum_entropy_normalized: f64,
}

impl IntervalRow {
    pub fn new(stat: &IntervalStat) -> Self {
        let undefined = EntropySet {
            entropy: UNDEFINED,
            novel_entropy: UNDEFINED,
            normalized: UNDEFINED,
            novel_normalized: UNDEFINED,
            ..default()
        };
        let (src, dst, novel_src, novel_dst) = match &stat.ip {
            Some(ip) => (ip.src, ip.dst, ip.src.novel_categories as i64, ip.dst.novel_categories as i64),
            None => (undefined, undefined, -1, -1),
        };
        let cumulative = stat.ip_cumulative;
        let cum = |f: fn(&CumulativeIpEntropy) -> f64| {
            cumulative.as_ref().map(f).unwrap_or(UNDEFINED)
        };
        IntervalRow {
            last_pkt_timestamp: stat.end,
            first_pkt_timestamp: stat.start,
            interval_length: stat.length,
            pkts_count: stat.counters.packets,
            pkt_rate: stat.pkt_rate,
            kbytes: stat.kbytes,
            kbyte_rate: stat.kbyte_rate,
            payload_count: stat.counters.payload,
            incorrect_checksum_count: stat.counters.incorrect_checksums,
            correct_checksum_count: stat.counters.correct_checksums,
            ip_novel_count: stat.novel.ip,
            ip_src_novel_count: novel_src,
            ip_dst_novel_count: novel_dst,
            port_novel_count: stat.novel.port,
            ttl_novel_count: stat.novel.ttl,
            win_size_novel_count: stat.novel.win_size,
            tos_novel_count: stat.novel.tos,
            mss_novel_count: stat.novel.mss,
            port_entropy: stat.port.entropy,
            ttl_entropy: stat.ttl.entropy,
            win_size_entropy: stat.win_size.entropy,
            tos_entropy: stat.tos.entropy,
            mss_entropy: stat.mss.entropy,
            port_novel_entropy: stat.port.novel_entropy,
            ttl_novel_entropy: stat.ttl.novel_entropy,
            win_size_novel_entropy: stat.win_size.novel_entropy,
            tos_novel_entropy: stat.tos.novel_entropy,
            mss_novel_entropy: stat.mss.novel_entropy,
            port_entropy_normalized: stat.port.normalized,
            ttl_entropy_normalized: stat.ttl.normalized,
            win_size_entropy_normalized: stat.win_size.normalized,
            tos_entropy_normalized: stat.tos.normalized,
            mss_entropy_normalized: stat.mss.normalized,
            port_novel_entropy_normalized: stat.port.novel_normalized,
            ttl_novel_entropy_normalized: stat.ttl.novel_normalized,
            win_size_novel_entropy_normalized: stat.win_size.novel_normalized,
            tos_novel_entropy_normalized: stat.tos.novel_normalized,
            mss_novel_entropy_normalized: stat.mss.novel_normalized,
            ip_src_entropy: src.entropy,
            ip_dst_entropy: dst.entropy,
            ip_src_entropy_normalized: src.normalized,
            ip_dst_entropy_normalized: dst.normalized,
            ip_src_novel_entropy: src.novel_entropy,
            ip_dst_novel_entropy: dst.novel_entropy,
            ip_src_novel_entropy_normalized: src.novel_normalized,
            ip_dst_novel_entropy_normalized: dst.novel_normalized,
            ip_src_cum_entropy: cum(|c| c.src),
            ip_dst_cum_entropy: cum(|c| c.dst),
            ip_src_cum_entropy_normalized: cum(|c| c.src_normalized),
            ip_dst_cum_entropy_normalized: cum(|c| c.dst_normalized),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PduRow {
    pub src_mac: String,
    pub dst_mac: String,
    pub ether_type: u32,
    pub pkt_count: u64,
    pub timestamp_last_occurrence: String,
}

pub fn ip_rows(stats: &StatisticsAccumulator) -> Vec<IpRow> {
    let duration = stats.capture_duration_s();
    let mut rows = stats.ips().iter()
        .map(|(address, entry)| IpRow::new(address, entry, duration))
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
    rows
}

pub fn field_rows(distribution: &ValueDistribution) -> Vec<FieldValueRow> {
    let mut rows = distribution.per_address.iter()
        .map(|((address, value), &count)| FieldValueRow { ip_address: address.clone(), value: *value, count })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| (&a.ip_address, a.value).cmp(&(&b.ip_address, b.value)));
    rows
}

pub fn port_rows(stats: &StatisticsAccumulator) -> Vec<PortRow> {
    let mut rows = stats.ports().iter()
        .map(|(key, counts)| PortRow {
            ip_address: key.address.clone(),
            port_direction: key.direction.to_string(),
            port_number: key.port,
            port_count: counts.count,
            byte_count: counts.bytes,
            port_protocol: key.protocol.clone(),
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| {
        (&a.ip_address, &a.port_direction, a.port_number, &a.port_protocol)
            .cmp(&(&b.ip_address, &b.port_direction, b.port_number, &b.port_protocol))
    });
    rows
}

pub fn protocol_rows(stats: &StatisticsAccumulator) -> Vec<ProtocolRow> {
    let mut rows = stats.protocols().iter()
        .map(|((address, protocol), counts)| ProtocolRow {
            ip_address: address.clone(),
            protocol_name: protocol.clone(),
            protocol_count: counts.count,
            byte_count: counts.bytes,
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| (&a.ip_address, &a.protocol_name).cmp(&(&b.ip_address, &b.protocol_name)));
    rows
}

pub fn mac_rows(stats: &StatisticsAccumulator) -> Vec<IpMacRow> {
    let mut rows = stats.macs().iter()
        .map(|(ip, mac)| IpMacRow { ip_address: ip.clone(), mac_address: mac.clone() })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
    rows
}

pub fn summary_row(stats: &StatisticsAccumulator) -> Result<SummaryRow> {
    let summary = stats.summary()?;
    Ok(SummaryRow {
        packet_count: summary.packet_count,
        capture_duration: summary.capture_duration,
        timestamp_first_packet: summary.first_packet,
        timestamp_last_packet: summary.last_packet,
        avg_packet_rate: summary.avg_packet_rate,
        avg_packet_size: summary.avg_packet_size_kbytes,
        avg_packets_sent_per_host: summary.avg_packets_sent_per_host,
        avg_bandwidth_in: summary.avg_bandwidth_in_kbit,
        avg_bandwidth_out: summary.avg_bandwidth_out_kbit,
        do_extra_tests: summary.extended_signals,
    })
}

/// Conversations with at least two packets; a lone packet has no delays to report.
pub fn conv_rows(pipeline: &Pipeline) -> Vec<ConvRow> {
    let conversations = pipeline.tracker().conversations();
    let mut keys = conversations.iter()
        .filter(|(_, entry)| entry.pkts_count > 1)
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    keys.sort();
    keys.into_iter()
        .map(|key| ConvRow::new(key, &conversations[key]))
        .collect()
}

/// TCP and UDP conversations with at least two packets.
pub fn ext_conv_rows(pipeline: &Pipeline) -> Vec<ExtConvRow> {
    let conversations = pipeline.tracker().extended_conversations();
    let mut keys = conversations.iter()
        .filter(|(key, entry)| entry.pkts_count > 1 && matches!(key.protocol.as_str(), "TCP" | "UDP"))
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    keys.sort();
    keys.into_iter()
        .map(|key| ExtConvRow::new(key, &conversations[key]))
        .collect()
}

pub fn pdu_rows(stats: &StatisticsAccumulator) -> Vec<PduRow> {
    let mut rows = stats.unrecognized_pdus().iter()
        .map(|(key, stat)| PduRow {
            src_mac: key.src_mac.clone(),
            dst_mac: key.dst_mac.clone(),
            ether_type: key.ether_type,
            pkt_count: stat.count,
            timestamp_last_occurrence: format_timestamp(stat.last_seen),
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| {
        (&a.src_mac, &a.dst_mac, a.ether_type).cmp(&(&b.src_mac, &b.dst_mac, b.ether_type))
    });
    rows
}

/// Hands every table of a finished pipeline to `sink`. Fails without writing anything
/// when no packet was processed.
pub fn write_report<S: StatsSink>(pipeline: &Pipeline, sink: &mut S) -> Result<()> {
    let stats = pipeline.accumulator();
    let summary = summary_row(stats)?;

    sink.write_table(IP_STATISTICS, &ip_rows(stats))?;
    for kind in FieldKind::iter() {
        sink.write_table(field_table(kind), &field_rows(stats.field(kind)))?;
    }
    sink.write_table(IP_PORTS, &port_rows(stats))?;
    sink.write_table(IP_PROTOCOLS, &protocol_rows(stats))?;
    sink.write_table(IP_MAC, &mac_rows(stats))?;
    sink.write_table(FILE_STATISTICS, &[summary])?;
    sink.write_table(CONV_STATISTICS, &conv_rows(pipeline))?;
    sink.write_table(CONV_STATISTICS_EXTENDED, &ext_conv_rows(pipeline))?;

    let extra_tests = stats.extended_signals();
    let mut tables = Vec::new();
    for table in pipeline.tables() {
        let name = interval_table(table.length());
        let rows = table.stats().values().map(IntervalRow::new).collect::<Vec<_>>();
        sink.write_table(&name, &rows)?;
        tables.push(IntervalTableRow { name, is_default: table.is_default(), extra_tests });
    }
    sink.write_table(INTERVAL_TABLES, &tables)?;
    sink.write_table(UNRECOGNIZED_PDUS, &pdu_rows(stats))?;
    Ok(())
}
