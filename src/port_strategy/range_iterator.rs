use gcd::Gcd;
use rand::Rng;

/// Walks a set of inclusive port ranges in a pseudo-random permutation.
///
/// The ranges are merged into disjoint ascending segments, then indexed
/// `0..total` through a prefix-sum table. The walk follows the additive
/// congruential step `next = (cur + step) % total` with `gcd(step, total)
/// == 1`, which makes the sequence a full-length cycle: every index comes
/// up exactly once before the iterator runs dry.
///
/// For more information: <https://en.wikipedia.org/wiki/Linear_congruential_generator>
pub struct RangeIterator {
    active: bool,
    total: u32,
    first_pick: u32,
    pick: u32,
    step: u32,
    /// Disjoint `(start, len)` segments, ascending.
    segments: Vec<(u32, u32)>,
    /// `prefix[i]` is the index of `segments[i]`'s first port.
    prefix: Vec<u32>,
}

impl RangeIterator {
    /// Builds the permutation over the given inclusive ranges.
    ///
    /// Overlapping and adjacent ranges are merged first, so duplicated input
    /// never yields a port twice. Empty input yields an empty iterator.
    pub fn new(input: &[(u16, u16)]) -> Self {
        let segments = merge_segments(input);
        let prefix = segments.iter().fold(vec![0u32], |mut acc, (_, len)| {
            acc.push(acc[acc.len() - 1] + len);
            acc
        });
        let total = prefix[prefix.len() - 1];
        if total == 0 {
            return Self {
                active: false,
                total,
                first_pick: 0,
                pick: 0,
                step: 0,
                segments,
                prefix,
            };
        }

        let first_pick = rand::rng().random_range(0..total);
        Self {
            active: true,
            total,
            first_pick,
            pick: first_pick,
            step: pick_coprime(total),
            segments,
            prefix,
        }
    }

    /// Maps a normalized index back to the port it stands for.
    #[allow(clippy::cast_possible_truncation)]
    fn port_at(&self, index: u32) -> u16 {
        let segment = self.prefix.partition_point(|&p| p <= index) - 1;
        let offset = index - self.prefix[segment];
        // Segment arithmetic stays within u16: every segment came from u16 bounds.
        (self.segments[segment].0 + offset) as u16
    }
}

impl Iterator for RangeIterator {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.active {
            return None;
        }

        let cur = self.pick;
        let next = (cur + self.step) % self.total;
        // Landing back on the seed means the cycle is complete after `cur`.
        if next == self.first_pick {
            self.active = false;
        }
        self.pick = next;

        Some(self.port_at(cur))
    }
}

/// Merges inclusive `u16` ranges into disjoint ascending `(start, len)`
/// segments over `u32`, so a range ending at `u16::MAX` keeps an exclusive
/// bound without overflowing.
fn merge_segments(input: &[(u16, u16)]) -> Vec<(u32, u32)> {
    let mut spans: Vec<(u32, u32)> = input
        .iter()
        .map(|&(start, end)| (u32::from(start), u32::from(end) + 1))
        .collect();
    spans.sort_unstable_by_key(|&(start, _)| start);

    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, merged_end)) if start <= *merged_end => {
                if end > *merged_end {
                    *merged_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }

    merged.into_iter().map(|(start, end)| (start, end - start)).collect()
}

/// Draws a step coprime with `total` so the additive cycle spans every
/// index. After ten failed draws falls back to `total - 1`, which is
/// always coprime but gives a more regular walk. Draws come from the
/// middle half of the domain; steps near the boundaries barely scramble
/// the order.
fn pick_coprime(total: u32) -> u32 {
    if total < 4 {
        return total.saturating_sub(1).max(1);
    }

    let boundary = total / 4;
    let mut rng = rand::rng();
    for _ in 0..10 {
        let candidate = rng.random_range(boundary..total - boundary);
        if total.gcd(candidate) == 1 {
            return candidate;
        }
    }

    total - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sorted_output(input: &[(u16, u16)]) -> Vec<u16> {
        let mut ports: Vec<u16> = RangeIterator::new(input).collect();
        ports.sort_unstable();
        ports
    }

    fn expected_ports(input: &[(u16, u16)]) -> Vec<u16> {
        let mut seen = HashSet::new();
        for &(start, end) in input {
            for port in start..=end {
                seen.insert(port);
            }
        }
        let mut ports: Vec<u16> = seen.into_iter().collect();
        ports.sort_unstable();
        ports
    }

    #[test]
    fn covers_disjoint_ranges_exactly_once() {
        let input = &[(1, 10), (20, 30), (100, 110)];
        assert_eq!(sorted_output(input), expected_ports(input));

        let input = &[(1, 100), (200, 500)];
        assert_eq!(sorted_output(input), expected_ports(input));
    }

    #[test]
    fn merges_overlapping_and_adjacent_ranges() {
        let input = &[(10, 20), (15, 25), (26, 30)];
        assert_eq!(sorted_output(input), expected_ports(input));
    }

    #[test]
    fn covers_the_full_port_domain() {
        let input = &[(1, u16::MAX)];
        let result = sorted_output(input);
        assert_eq!(result.len(), 65_535);
        assert_eq!(result, expected_ports(input));
    }

    #[test]
    fn no_port_repeats() {
        let input = &[(50, 100), (1000, 2000), (30000, 30010)];
        let result: Vec<u16> = RangeIterator::new(input).collect();
        let unique: HashSet<u16> = result.iter().copied().collect();
        assert_eq!(unique.len(), result.len());
    }

    #[test]
    fn tiny_and_empty_inputs() {
        assert_eq!(sorted_output(&[(443, 443)]), vec![443]);
        assert_eq!(sorted_output(&[(80, 81)]), vec![80, 81]);
        assert!(RangeIterator::new(&[]).next().is_none());
    }
}
