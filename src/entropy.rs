//! Shannon entropy over count distributions, with a novelty-partitioned variant
//! that compares a cumulative distribution against the previous boundary's baseline.

use std::collections::HashMap;
use std::hash::Hash;

use crate::stats::IpCounts;

/// `-Σ p·log2(p)` with `p = count / Σcounts`. Zero counts are skipped; an all-zero
/// or empty input has entropy 0.
pub fn shannon_entropy<I>(counts: I) -> f64
    where
        I: IntoIterator<Item=u64>,
        I::IntoIter: Clone,
{
    let counts = counts.into_iter();
    let total: u64 = counts.clone().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// `entropy / log2(categories)`, or 0 when there are fewer than two categories.
pub fn normalized_entropy(entropy: f64, categories: usize) -> f64 {
    if categories > 1 {
        entropy / (categories as f64).log2()
    } else {
        0.0
    }
}

/// Entropy of the interval's activity next to the entropy of the novel keys alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntropySet {
    pub entropy: f64,
    pub novel_entropy: f64,
    pub normalized: f64,
    pub novel_normalized: f64,
    /// Keys that contributed to the activity distribution.
    pub categories: usize,
    /// Keys absent from the baseline.
    pub novel_categories: usize,
}

impl EntropySet {
    /// Builds the set from `(current, baseline)` pairs. A missing baseline marks the key
    /// as novel: its whole count goes to both distributions. Otherwise only a positive
    /// increase goes to the activity distribution.
    pub fn from_pairs<I>(pairs: I) -> Self
        where I: IntoIterator<Item=(u64, Option<u64>)>
    {
        let mut counts = Vec::new();
        let mut novel = Vec::new();
        for (current, baseline) in pairs {
            match baseline {
                None if current > 0 => {
                    counts.push(current);
                    novel.push(current);
                }
                Some(old) if current > old => counts.push(current - old),
                _ => {}
            }
        }
        let entropy = shannon_entropy(counts.iter().copied());
        let novel_entropy = shannon_entropy(novel.iter().copied());
        EntropySet {
            entropy,
            novel_entropy,
            normalized: normalized_entropy(entropy, counts.len()),
            novel_normalized: normalized_entropy(novel_entropy, novel.len()),
            categories: counts.len(),
            novel_categories: novel.len(),
        }
    }
}

pub fn entropy_with_novelty<K: Hash + Eq>(
    current: &HashMap<K, u64>,
    baseline: &HashMap<K, u64>,
) -> EntropySet
{
    EntropySet::from_pairs(
        current.iter().map(|(key, &count)| (count, baseline.get(key).copied()))
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IpEntropies {
    pub src: EntropySet,
    pub dst: EntropySet,
}

/// Novelty partition over per-address sent (src) and received (dst) packet counts.
pub fn ip_entropy_with_novelty<'a, I>(current: I, baseline: &HashMap<String, IpCounts>) -> IpEntropies
    where I: IntoIterator<Item=(&'a String, IpCounts)>
{
    let mut sent = Vec::new();
    let mut received = Vec::new();
    for (address, counts) in current {
        let old = baseline.get(address);
        sent.push((counts.sent, old.map(|o| o.sent)));
        received.push((counts.received, old.map(|o| o.received)));
    }
    IpEntropies {
        src: EntropySet::from_pairs(sent),
        dst: EntropySet::from_pairs(received),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeIpEntropy {
    pub src: f64,
    pub dst: f64,
    pub src_normalized: f64,
    pub dst_normalized: f64,
}

/// Whole-capture entropy of senders and receivers, normalized by the number of known addresses.
pub fn cumulative_ip_entropy<I>(counts: I) -> CumulativeIpEntropy
    where I: IntoIterator<Item=IpCounts>
{
    let counts = counts.into_iter().collect::<Vec<_>>();
    let src = shannon_entropy(counts.iter().map(|c| c.sent));
    let dst = shannon_entropy(counts.iter().map(|c| c.received));
    CumulativeIpEntropy {
        src,
        dst,
        src_normalized: normalized_entropy(src, counts.len()),
        dst_normalized: normalized_entropy(dst, counts.len()),
    }
}
