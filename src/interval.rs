//! Interval boundaries: diffing cumulative state against the previous boundary.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tracing::{debug, span, Level};

use crate::*;
use crate::config::WindowStart;
use crate::entropy::{
    cumulative_ip_entropy, entropy_with_novelty, ip_entropy_with_novelty,
    CumulativeIpEntropy, EntropySet, IpEntropies,
};
use crate::stats::{
    DistinctCounts, FieldKind, IpCounts, IpStatEntry, ScalarCounters, StatisticsAccumulator,
    KBYTE, MICROS,
};

/// Deep copy of the cumulative distributions and counters at a boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub ips: HashMap<String, IpCounts>,
    pub ttl: HashMap<u32, u64>,
    pub win_size: HashMap<u32, u64>,
    pub tos: HashMap<u32, u64>,
    pub mss: HashMap<u32, u64>,
    pub ports: HashMap<u16, u64>,
    pub counters: ScalarCounters,
    pub distinct: DistinctCounts,
}

impl Baseline {
    pub fn capture(stats: &StatisticsAccumulator) -> Self {
        Baseline {
            ips: stats.ips().iter()
                .map(|(address, entry)| (address.clone(), entry.counts()))
                .collect(),
            ttl: stats.field(FieldKind::Ttl).values.clone().into_inner(),
            win_size: stats.field(FieldKind::WinSize).values.clone().into_inner(),
            tos: stats.field(FieldKind::Tos).values.clone().into_inner(),
            mss: stats.field(FieldKind::Mss).values.clone().into_inner(),
            ports: stats.port_values().clone().into_inner(),
            counters: stats.counters(),
            distinct: stats.distinct_counts(),
        }
    }

    fn field(&self, kind: FieldKind) -> &HashMap<u32, u64> {
        match kind {
            FieldKind::Ttl => &self.ttl,
            FieldKind::Tos => &self.tos,
            FieldKind::Mss => &self.mss,
            FieldKind::WinSize => &self.win_size,
        }
    }
}

/// One interval record, keyed by its end timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalStat {
    pub start: u64,
    pub end: u64,
    /// Window length the rates were computed over, in microseconds.
    pub length: u64,
    /// Packets, bytes, payloads and checksums seen within the window.
    pub counters: ScalarCounters,
    /// Distinct keys that first appeared within the window.
    pub novel: DistinctCounts,
    pub pkt_rate: f64,
    pub kbytes: f64,
    pub kbyte_rate: f64,
    pub ttl: EntropySet,
    pub win_size: EntropySet,
    pub tos: EntropySet,
    pub mss: EntropySet,
    pub port: EntropySet,
    /// Present only with extended signals.
    pub ip: Option<IpEntropies>,
    pub ip_cumulative: Option<CumulativeIpEntropy>,
}

impl IntervalStat {
    pub fn field(&self, kind: FieldKind) -> &EntropySet {
        match kind {
            FieldKind::Ttl => &self.ttl,
            FieldKind::Tos => &self.tos,
            FieldKind::Mss => &self.mss,
            FieldKind::WinSize => &self.win_size,
        }
    }
}

/// `value` per second over a window of `length` microseconds, 0 for an empty window.
pub fn rate(value: f64, length: u64) -> f64 {
    if length == 0 {
        0.0
    } else {
        value * MICROS / length as f64
    }
}

fn update_address_rates(
    entry: &mut IpStatEntry,
    length: u64,
    start: u64,
    after_boundary: bool,
    mode: WindowStart,
) {
    let (packets, bytes) = entry.sent_window(start, after_boundary, mode);
    let pkt_rate = rate(packets as f64, length);
    let kbyte_rate = rate(bytes as f64 / KBYTE, length);
    entry.update_interval_rates(pkt_rate, kbyte_rate);
}

/// Produces the interval table for one interval length.
#[derive(Debug)]
pub struct IntervalSnapshotter {
    length: u64,
    track_address_rates: bool,
    window_start: WindowStart,
    baseline: Baseline,
    stats: BTreeMap<u64, IntervalStat>,
    /// Empty windows emitted since the last full snapshot.
    quiet_windows: u32,
}

impl IntervalSnapshotter {
    /// `track_address_rates` makes this snapshotter maintain the per-address min/max rates.
    pub fn new(length: u64, track_address_rates: bool, window_start: WindowStart) -> Self {
        IntervalSnapshotter {
            length,
            track_address_rates,
            window_start,
            baseline: default(),
            stats: default(),
            quiet_windows: 0,
        }
    }

    /// Nominal interval length of this table.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_default(&self) -> bool {
        self.track_address_rates
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn stats(&self) -> &BTreeMap<u64, IntervalStat> {
        &self.stats
    }

    pub fn into_stats(self) -> BTreeMap<u64, IntervalStat> {
        self.stats
    }

    /// Emits the record for `[start, end]` and makes the current state the new baseline.
    /// `length` is the window the rates are computed over.
    pub fn snapshot(
        &mut self,
        accumulator: &mut StatisticsAccumulator,
        length: u64,
        start: u64,
        end: u64,
    ) -> &IntervalStat
    {
        let span = span!(Level::DEBUG, "INTERVAL", "{}", self.length);
        let _enter = span.enter();

        self.update_address_rates(accumulator, length, start);
        let accumulator = &*accumulator;

        let (ip, ip_cumulative) = if accumulator.extended_signals() {
            let current = accumulator.ips().iter().map(|(address, entry)| (address, entry.counts()));
            let cumulative = cumulative_ip_entropy(accumulator.ips().values().map(IpStatEntry::counts));
            (Some(ip_entropy_with_novelty(current, &self.baseline.ips)), Some(cumulative))
        } else {
            (None, None)
        };

        let counters = accumulator.counters().delta(&self.baseline.counters);
        let novel = accumulator.distinct_counts().delta(&self.baseline.distinct);
        let kbytes = counters.bytes as f64 / KBYTE;
        let field_entropy = |kind: FieldKind| {
            entropy_with_novelty(&accumulator.field(kind).values, self.baseline.field(kind))
        };

        let stat = IntervalStat {
            start,
            end,
            length,
            counters,
            novel,
            pkt_rate: rate(counters.packets as f64, length),
            kbytes,
            kbyte_rate: rate(kbytes, length),
            ttl: field_entropy(FieldKind::Ttl),
            win_size: field_entropy(FieldKind::WinSize),
            tos: field_entropy(FieldKind::Tos),
            mss: field_entropy(FieldKind::Mss),
            port: entropy_with_novelty(accumulator.port_values(), &self.baseline.ports),
            ip,
            ip_cumulative,
        };
        debug!(start, end, packets = counters.packets, novel_ips = novel.ip, "interval closed");

        self.baseline = Baseline::capture(accumulator);
        self.quiet_windows = 0;
        self.insert(end, stat)
    }

    /// Emits the record for a window nothing was applied to since the last snapshot.
    /// The baseline still matches the accumulator, so only the address rates can move.
    pub fn snapshot_empty(
        &mut self,
        accumulator: &mut StatisticsAccumulator,
        length: u64,
        start: u64,
        end: u64,
    ) -> &IntervalStat
    {
        // past the second quiet window every address scan repeats the previous one
        if self.quiet_windows < 2 {
            self.update_address_rates(accumulator, length, start);
        }
        self.quiet_windows = self.quiet_windows.saturating_add(1);

        let extended = accumulator.extended_signals();
        let ip_cumulative = match self.stats.values().next_back() {
            Some(last) => last.ip_cumulative,
            None => extended.then(|| cumulative_ip_entropy(accumulator.ips().values().map(IpStatEntry::counts))),
        };
        let stat = IntervalStat {
            start,
            end,
            length,
            ip: extended.then(IpEntropies::default),
            ip_cumulative,
            ..default()
        };
        self.insert(end, stat)
    }

    fn update_address_rates(&self, accumulator: &mut StatisticsAccumulator, length: u64, start: u64) {
        if !self.track_address_rates {
            return;
        }
        let mode = self.window_start;
        let after_boundary = !self.stats.is_empty();
        let ips: &mut HashMap<String, IpStatEntry> = accumulator.ips_mut();
        ips.par_iter_mut()
            .for_each(|(_, entry)| update_address_rates(entry, length, start, after_boundary, mode));
    }

    fn insert(&mut self, end: u64, stat: IntervalStat) -> &IntervalStat {
        let entry = self.stats.entry(end).or_default();
        *entry = stat;
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RateExtremes;

    const A: &str = "10.0.0.1";
    const B: &str = "10.0.0.2";
    const C: &str = "10.0.0.3";

    fn accumulator() -> StatisticsAccumulator {
        let mut stats = StatisticsAccumulator::new(true);
        stats.record_packet(A, B, 1024, 100);
        stats.record_field_value(FieldKind::Ttl, A, 64);
        stats.record_port(A, 1000, B, 80, "TCP");
        stats.record_packet(B, A, 2048, 200);
        stats.record_field_value(FieldKind::Ttl, B, 128);
        stats.record_port(B, 80, A, 1000, "TCP");
        stats
    }

    #[test]
    fn test_zero_length_interval_has_zero_rates() {
        let mut stats = accumulator();
        let mut snapshotter = IntervalSnapshotter::new(0, true, WindowStart::AtOrAfter);
        let stat = snapshotter.snapshot(&mut stats, 0, 100, 100).clone();
        assert_eq!(stat.pkt_rate, 0.0);
        assert_eq!(stat.kbyte_rate, 0.0);
        assert_eq!(stat.counters.packets, 2);
        let a = stats.ip(A).unwrap();
        assert_eq!(a.interval_pkt_rate, Some(RateExtremes { min: 0.0, max: 0.0 }));
    }

    #[test]
    fn test_first_boundary_is_all_novel() {
        let mut stats = accumulator();
        let mut snapshotter = IntervalSnapshotter::new(1_000_000, true, WindowStart::AtOrAfter);
        let stat = snapshotter.snapshot(&mut stats, 1_000_000, 0, 1_000_000).clone();
        assert_eq!(stat.novel.ip, 2);
        assert_eq!(stat.novel.ttl, 2);
        assert_eq!(stat.novel.port, 2);
        assert_eq!(stat.ttl.novel_categories, 2);
        assert_eq!(stat.ttl.entropy, 1.0);
        assert_eq!(stat.ttl.novel_entropy, 1.0);
        assert_eq!(stat.pkt_rate, 2.0);
        assert_eq!(stat.kbytes, 3.0);
        assert_eq!(stat.kbyte_rate, 3.0);
        let ip = stat.ip.unwrap();
        assert_eq!(ip.src.novel_categories, 2);
        assert_eq!(ip.src.entropy, 1.0);
        assert_eq!(stat.ip_cumulative.unwrap().src_normalized, 1.0);
        assert_eq!(stats.ip(A).unwrap().interval_pkt_rate.unwrap().max, 1.0);
        assert_eq!(stats.ip(B).unwrap().interval_kbyte_rate.unwrap().max, 2.0);
    }

    #[test]
    fn test_baseline_replaced_after_boundary() {
        let mut stats = accumulator();
        let mut snapshotter = IntervalSnapshotter::new(1_000, false, WindowStart::AtOrAfter);
        snapshotter.snapshot(&mut stats, 1_000, 0, 1_000);
        assert_eq!(snapshotter.baseline(), &Baseline::capture(&stats));

        stats.record_packet(A, C, 100, 1_500);
        stats.record_field_value(FieldKind::Ttl, A, 64);
        let stat = snapshotter.snapshot(&mut stats, 1_000, 1_000, 2_000).clone();
        assert_eq!(stat.counters.packets, 1);
        assert_eq!(stat.counters.bytes, 100);
        assert_eq!(stat.novel.ip, 1);
        assert_eq!(stat.novel.ttl, 0);
        assert_eq!(stat.ttl.categories, 1);
        assert_eq!(stat.ttl.novel_categories, 0);
        let ip = stat.ip.unwrap();
        assert_eq!(ip.dst.novel_categories, 1);
        assert_eq!(ip.src.novel_categories, 0);
        assert_eq!(snapshotter.stats().keys().copied().collect::<Vec<_>>(), vec![1_000, 2_000]);
        // untracked snapshotter leaves per-address extremes alone
        assert_eq!(stats.ip(A).unwrap().interval_pkt_rate, None);
    }

    #[test]
    fn test_empty_window_is_silent() {
        let mut stats = accumulator();
        let mut snapshotter = IntervalSnapshotter::new(1_000, true, WindowStart::AtOrAfter);
        snapshotter.snapshot(&mut stats, 1_000, 0, 1_000);
        let stat = snapshotter.snapshot(&mut stats, 1_000, 1_000, 2_000).clone();
        assert_eq!(stat.counters, ScalarCounters::default());
        assert_eq!(stat.novel, DistinctCounts::default());
        assert_eq!(stat.ttl, EntropySet::default());
        assert_eq!(stat.port, EntropySet::default());
        assert_eq!(stat.ip.unwrap(), IpEntropies::default());
    }

    #[test]
    fn test_ip_entropy_gated_by_extended_signals() {
        let mut stats = StatisticsAccumulator::new(false);
        stats.record_packet(A, B, 10, 0);
        stats.record_field_value(FieldKind::Ttl, A, 64);
        let mut snapshotter = IntervalSnapshotter::new(1_000, true, WindowStart::AtOrAfter);
        let stat = snapshotter.snapshot(&mut stats, 1_000, 0, 1_000);
        assert_eq!(stat.ip, None);
        assert_eq!(stat.ip_cumulative, None);
        assert_eq!(stat.ttl.novel_categories, 1);
    }

    #[test]
    fn test_empty_record_matches_full_snapshot() {
        let mut full_stats = accumulator();
        let mut quiet_stats = accumulator();
        let mut full = IntervalSnapshotter::new(1_000, true, WindowStart::AtOrAfter);
        let mut quiet = IntervalSnapshotter::new(1_000, true, WindowStart::AtOrAfter);
        full.snapshot(&mut full_stats, 1_000, 0, 1_000);
        quiet.snapshot(&mut quiet_stats, 1_000, 0, 1_000);
        for start in [1_000, 2_000, 3_000] {
            full.snapshot(&mut full_stats, 1_000, start, start + 1_000);
            quiet.snapshot_empty(&mut quiet_stats, 1_000, start, start + 1_000);
        }
        assert_eq!(full.stats(), quiet.stats());
        assert_eq!(full.baseline(), quiet.baseline());
        for address in [A, B] {
            let rates = quiet_stats.ip(address).unwrap().interval_pkt_rate;
            assert_eq!(full_stats.ip(address).unwrap().interval_pkt_rate, rates);
            assert_eq!(rates.unwrap().min, 0.0);
        }
    }

    #[test]
    fn test_boundary_send_not_counted_twice() {
        let mut stats = StatisticsAccumulator::new(true);
        let mut snapshotter = IntervalSnapshotter::new(1_000, true, WindowStart::AtOrAfter);
        stats.record_packet(A, B, 100, 0);
        stats.record_packet(A, B, 100, 1_000);
        snapshotter.snapshot(&mut stats, 1_000, 0, 1_000);
        stats.record_packet(A, B, 100, 2_000);
        let stat = snapshotter.snapshot(&mut stats, 1_000, 1_000, 2_000).clone();
        assert_eq!(stat.pkt_rate, 1_000.0);
        let rates = stats.ip(A).unwrap().interval_pkt_rate.unwrap();
        assert_eq!(rates, RateExtremes { min: 1_000.0, max: 2_000.0 });
        assert_eq!(rates.min, stat.pkt_rate);
    }
}
