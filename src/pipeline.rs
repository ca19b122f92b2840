//! The ingestion loop: applies decoded events in order and closes interval
//! windows whenever an event crosses a boundary.

use tracing::{debug, info, warn};

use crate::*;
use crate::config::WindowStart;
use crate::conversation::ConversationTracker;
use crate::interval::{IntervalSnapshotter, IntervalStat};
use crate::stats::{CaptureSummary, FieldKind};

/// One interval table and the start of its open window.
#[derive(Debug)]
pub struct IntervalTable {
    snapshotter: IntervalSnapshotter,
    start: Option<u64>,
    pending: bool,
}

impl IntervalTable {
    fn new(length: u64, is_default: bool, window_start: WindowStart) -> Self {
        IntervalTable {
            snapshotter: IntervalSnapshotter::new(length, is_default, window_start),
            start: None,
            pending: false,
        }
    }

    pub fn length(&self) -> u64 {
        self.snapshotter.length()
    }

    pub fn is_default(&self) -> bool {
        self.snapshotter.is_default()
    }

    pub fn stats(&self) -> &std::collections::BTreeMap<u64, IntervalStat> {
        self.snapshotter.stats()
    }

    /// Closes every whole window that ends before `timestamp`, empty ones included.
    /// A packet exactly on a boundary still belongs to the window it closes.
    fn advance(&mut self, accumulator: &mut StatisticsAccumulator, timestamp: u64) {
        let length = self.length();
        let mut start = *self.start.get_or_insert(timestamp);
        while timestamp > start + length {
            if self.pending {
                self.snapshotter.snapshot(accumulator, length, start, start + length);
                self.pending = false;
            } else {
                self.snapshotter.snapshot_empty(accumulator, length, start, start + length);
            }
            start += length;
        }
        self.start = Some(start);
    }

    /// Emits the trailing partial window, ending at the last packet.
    fn close(&mut self, accumulator: &mut StatisticsAccumulator, last: u64) {
        if let (true, Some(start)) = (self.pending, self.start) {
            let end = last.max(start);
            self.snapshotter.snapshot(accumulator, end - start, start, end);
            self.pending = false;
        }
    }
}

#[derive(Debug)]
pub struct Pipeline {
    config: StatsConfig,
    accumulator: StatisticsAccumulator,
    tracker: ConversationTracker,
    tables: Vec<IntervalTable>,
    finished: bool,
}

impl Pipeline {
    pub fn new(config: StatsConfig) -> Result<Self> {
        config.validate()?;
        let tables = config.effective_intervals().into_iter()
            .enumerate()
            .map(|(i, length)| IntervalTable::new(length, i == 0, config.window_start))
            .collect();
        Ok(Pipeline {
            accumulator: StatisticsAccumulator::new(config.extended_signals),
            tracker: ConversationTracker::new(config.idle_threshold_us, config.idle_gap),
            tables,
            finished: false,
            config,
        })
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn accumulator(&self) -> &StatisticsAccumulator {
        &self.accumulator
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    pub fn tables(&self) -> &[IntervalTable] {
        &self.tables
    }

    /// Applies one event. Events must arrive in non-decreasing timestamp order.
    pub fn process(&mut self, event: &PacketEvent) {
        if self.finished {
            warn!(timestamp = event.timestamp, "event after finish ignored");
            return;
        }
        for table in &mut self.tables {
            table.advance(&mut self.accumulator, event.timestamp);
            table.pending = true;
        }
        self.apply(event);
    }

    pub fn process_all<'a>(&mut self, events: impl IntoIterator<Item=&'a PacketEvent>) {
        for event in events {
            self.process(event);
        }
    }

    fn apply(&mut self, event: &PacketEvent) {
        let stats = &mut self.accumulator;
        let (ts, length) = (event.timestamp, event.length);

        if !event.is_recognized() {
            stats.count_packet(length, ts);
            let src_mac = event.src_mac.as_deref().unwrap_or_default();
            let dst_mac = event.dst_mac.as_deref().unwrap_or_default();
            stats.record_unrecognized_pdu(src_mac, dst_mac, event.ether_type.unwrap_or_default(), ts);
            return;
        }

        let (src, dst, protocol) = (&event.src_addr, &event.dst_addr, &event.protocol);
        stats.record_packet(src, dst, length, ts);
        stats.record_protocol(src, protocol, length);

        let fields = [
            (FieldKind::Ttl, event.ttl),
            (FieldKind::Tos, event.tos),
            (FieldKind::Mss, event.mss),
            (FieldKind::WinSize, event.win_size),
        ];
        for (kind, value) in fields {
            if let Some(value) = value {
                stats.record_field_value(kind, src, value);
            }
        }
        if let Some(valid) = event.checksum_valid {
            stats.record_transport_checksum(valid);
        }
        if let Some(payload) = event.payload_length {
            stats.record_payload_presence(payload);
        }
        if let Some(mac) = &event.src_mac {
            stats.assign_mac(src, mac);
        }
        if let Some(mac) = &event.dst_mac {
            stats.assign_mac(dst, mac);
        }

        if let (Some(src_port), Some(dst_port)) = (event.src_port, event.dst_port) {
            stats.record_port(src, src_port, dst, dst_port, protocol);
            stats.record_port_bytes(src, src_port, dst, dst_port, protocol, length);
            self.tracker.add_basic(src, src_port, dst, dst_port, ts, event.tcp_flags);
            self.tracker.add_extended(src, src_port, dst, dst_port, protocol, ts);
        }
    }

    /// Closes the trailing windows and finalizes conversations. Runs once.
    pub fn finish(&mut self) {
        if self.finished {
            warn!("pipeline already finished");
            return;
        }
        if let Some(last) = self.accumulator.last_timestamp() {
            for table in &mut self.tables {
                table.close(&mut self.accumulator, last);
            }
        }
        self.tracker.finalize_intervals();
        self.finished = true;
        for table in &self.tables {
            debug!(length = table.length(), records = table.stats().len(), "interval table");
        }
        info!(
            packets = self.accumulator.packet_count(),
            addresses = self.accumulator.ips().len(),
            conversations = self.tracker.conversations().len(),
            "statistics collected"
        );
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn summary(&self) -> Result<CaptureSummary> {
        self.accumulator.summary()
    }
}
