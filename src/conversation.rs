//! Per-conversation timing: direction resolution, idle-gap segmentation and RTT.

use tracing::{debug, span, warn, Level};

use crate::*;
use crate::config::{IdleGap, DEFAULT_IDLE_THRESHOLD_US};
use crate::event::TcpFlags;
use crate::stats::MICROS;

/// Only the first few inter-arrival gaps of a conversation are kept.
pub const MAX_INTERARRIVAL_SAMPLES: usize = 3;

/// Two endpoints in the direction the conversation was first observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConvKey {
    pub addr_a: String,
    pub port_a: u16,
    pub addr_b: String,
    pub port_b: u16,
}

impl ConvKey {
    pub fn new(addr_a: &str, port_a: u16, addr_b: &str, port_b: u16) -> Self {
        ConvKey {
            addr_a: addr_a.to_string(),
            port_a,
            addr_b: addr_b.to_string(),
            port_b,
        }
    }

    pub fn reversed(&self) -> Self {
        ConvKey {
            addr_a: self.addr_b.clone(),
            port_a: self.port_b,
            addr_b: self.addr_a.clone(),
            port_b: self.port_a,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtConvKey {
    pub endpoints: ConvKey,
    pub protocol: String,
}

impl ExtConvKey {
    pub fn reversed(&self) -> Self {
        ExtConvKey { endpoints: self.endpoints.reversed(), protocol: self.protocol.clone() }
    }
}

/// Min/max/avg over the kept inter-arrival gaps, in microseconds.
pub type Delays = crate::stats::Latency;

/// Appends `timestamp`, keeping the gap to the previous packet while fewer than
/// `MAX_INTERARRIVAL_SAMPLES` gaps exist.
fn push_timestamp(timestamps: &mut Vec<u64>, interarrival: &mut Vec<u64>, timestamp: u64) {
    if let Some(&last) = timestamps.last() {
        if timestamps.len() <= MAX_INTERARRIVAL_SAMPLES {
            interarrival.push(timestamp.saturating_sub(last));
        }
    }
    timestamps.push(timestamp);
}

fn duration(timestamps: &[u64]) -> u64 {
    match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) => last.saturating_sub(*first),
        _ => 0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConvEntry {
    pub pkts_count: u64,
    pub interarrival: Vec<u64>,
    pub timestamps: Vec<u64>,
    pub flags: Vec<TcpFlags>,
    pub delays: Delays,
    /// Packets per second over the whole conversation.
    pub avg_pkt_rate: f64,
    /// Mean SYN→ACK time in microseconds; `None` without a single matched pair.
    pub round_trip_time: Option<f64>,
}

impl ConvEntry {
    fn add(&mut self, timestamp: u64, flags: TcpFlags) {
        push_timestamp(&mut self.timestamps, &mut self.interarrival, timestamp);
        self.flags.push(flags);
        self.pkts_count += 1;
    }

    pub fn duration_us(&self) -> u64 {
        duration(&self.timestamps)
    }

    fn finalize(&mut self) {
        self.delays = Delays::of_gaps(&self.interarrival);
        let duration = self.duration_us();
        self.avg_pkt_rate = if duration == 0 {
            0.0
        } else {
            self.pkts_count as f64 * MICROS / duration as f64
        };
        self.round_trip_time = round_trip_time(&self.timestamps, &self.flags);
    }
}

/// Pairs every SYN (while none is pending) with the next ACK and averages the gaps.
/// Flags are compared exactly, so a SYN+ACK segment counts as neither.
pub fn round_trip_time(timestamps: &[u64], flags: &[TcpFlags]) -> Option<f64> {
    let mut pending = None;
    let mut samples = Vec::new();
    for (&timestamp, &flag) in timestamps.iter().zip(flags) {
        if flag == TcpFlags::SYN && pending.is_none() {
            pending = Some(timestamp);
        } else if flag == TcpFlags::ACK {
            if let Some(syn) = pending.take() {
                samples.push(timestamp.saturating_sub(syn));
            }
        }
    }
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommInterval {
    pub start: u64,
    pub end: u64,
    pub pkts_count: u64,
}

impl CommInterval {
    fn open(timestamp: u64) -> Self {
        CommInterval { start: timestamp, end: timestamp, pkts_count: 1 }
    }

    pub fn duration_us(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtConvEntry {
    pub pkts_count: u64,
    pub interarrival: Vec<u64>,
    pub timestamps: Vec<u64>,
    pub intervals: Vec<CommInterval>,
    pub delays: Delays,
    /// Packets per second, or the packet count for a zero-length conversation.
    pub avg_pkt_rate: f64,
    pub avg_int_pkts_count: f64,
    /// Seconds between the end of one interval and the start of the next.
    pub avg_time_between_ints: f64,
    /// Seconds.
    pub avg_interval_time: f64,
    /// Seconds from the first to the last packet.
    pub total_comm_duration: f64,
}

impl ExtConvEntry {
    fn add(&mut self, timestamp: u64, threshold: u64, idle_gap: IdleGap) {
        match self.intervals.last_mut() {
            Some(current) if !idle_gap.splits(timestamp.saturating_sub(current.end), threshold) => {
                current.end = timestamp;
                current.pkts_count += 1;
            }
            _ => self.intervals.push(CommInterval::open(timestamp)),
        }
        push_timestamp(&mut self.timestamps, &mut self.interarrival, timestamp);
        self.pkts_count += 1;
    }

    fn finalize(&mut self) {
        self.delays = Delays::of_gaps(&self.interarrival);
        self.total_comm_duration = duration(&self.timestamps) as f64 / MICROS;
        self.avg_pkt_rate = if self.total_comm_duration == 0.0 {
            self.pkts_count as f64
        } else {
            self.pkts_count as f64 / self.total_comm_duration
        };

        let intervals = self.intervals.len();
        if intervals == 0 {
            return;
        }
        let packets: u64 = self.intervals.iter().map(|i| i.pkts_count).sum();
        let durations: u64 = self.intervals.iter().map(|i| i.duration_us()).sum();
        let gaps = self.intervals.windows(2)
            .map(|w| w[1].start.saturating_sub(w[0].end))
            .collect::<Vec<_>>();
        self.avg_int_pkts_count = packets as f64 / intervals as f64;
        self.avg_interval_time = durations as f64 / intervals as f64 / MICROS;
        self.avg_time_between_ints = if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().sum::<u64>() as f64 / gaps.len() as f64 / MICROS
        };
    }
}

#[derive(Debug)]
pub struct ConversationTracker {
    idle_threshold: u64,
    idle_gap: IdleGap,
    conversations: Table<ConvKey, ConvEntry>,
    extended: Table<ExtConvKey, ExtConvEntry>,
    finalized: bool,
}

impl Default for ConversationTracker {
    fn default() -> Self {
        ConversationTracker::new(DEFAULT_IDLE_THRESHOLD_US, IdleGap::default())
    }
}

impl ConversationTracker {
    pub fn new(idle_threshold: u64, idle_gap: IdleGap) -> Self {
        ConversationTracker {
            idle_threshold,
            idle_gap,
            conversations: default(),
            extended: default(),
            finalized: false,
        }
    }

    /// The key already holding this conversation, or the forward key for a new one.
    fn resolve<K: Eq + std::hash::Hash, V>(table: &Table<K, V>, forward: K, reversed: K) -> K {
        if table.contains_key(&reversed) {
            reversed
        } else {
            forward
        }
    }

    pub fn add_basic(
        &mut self,
        sender: &str, sender_port: u16,
        receiver: &str, receiver_port: u16,
        timestamp: u64,
        flags: Option<TcpFlags>,
    )
    {
        let forward = ConvKey::new(sender, sender_port, receiver, receiver_port);
        let reversed = forward.reversed();
        let key = Self::resolve(&self.conversations, forward, reversed);
        self.conversations.get_or_insert_default(key).add(timestamp, flags.unwrap_or_default());
    }

    pub fn add_extended(
        &mut self,
        sender: &str, sender_port: u16,
        receiver: &str, receiver_port: u16,
        protocol: &str,
        timestamp: u64,
    )
    {
        let forward = ExtConvKey {
            endpoints: ConvKey::new(sender, sender_port, receiver, receiver_port),
            protocol: protocol.to_string(),
        };
        let reversed = forward.reversed();
        let key = Self::resolve(&self.extended, forward, reversed);
        let (threshold, idle_gap) = (self.idle_threshold, self.idle_gap);
        self.extended.get_or_insert_default(key).add(timestamp, threshold, idle_gap);
    }

    /// Derives delays, rates, RTT and interval aggregates. Runs once; later calls are ignored.
    pub fn finalize_intervals(&mut self) {
        if self.finalized {
            warn!("conversation intervals already finalized");
            return;
        }
        let span = span!(Level::DEBUG, "FINALIZE");
        let _enter = span.enter();
        for entry in self.conversations.values_mut() {
            entry.finalize();
        }
        for entry in self.extended.values_mut() {
            entry.finalize();
        }
        self.finalized = true;
        debug!(
            conversations = self.conversations.len(),
            extended = self.extended.len(),
            "conversation statistics finalized"
        );
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn conversations(&self) -> &Table<ConvKey, ConvEntry> {
        &self.conversations
    }

    pub fn extended_conversations(&self) -> &Table<ExtConvKey, ExtConvEntry> {
        &self.extended
    }

    /// Looks the conversation up under either direction.
    pub fn conversation(&self, addr_a: &str, port_a: u16, addr_b: &str, port_b: u16) -> Option<&ConvEntry> {
        let key = ConvKey::new(addr_a, port_a, addr_b, port_b);
        self.conversations.get(&key)
            .or_else(|| self.conversations.get(&key.reversed()))
    }

    pub fn extended_conversation(
        &self,
        addr_a: &str, port_a: u16,
        addr_b: &str, port_b: u16,
        protocol: &str,
    ) -> Option<&ExtConvEntry>
    {
        let key = ExtConvKey {
            endpoints: ConvKey::new(addr_a, port_a, addr_b, port_b),
            protocol: protocol.to_string(),
        };
        self.extended.get(&key)
            .or_else(|| self.extended.get(&key.reversed()))
    }
}
