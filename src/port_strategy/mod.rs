//! Decides the order in which a scan sweeps its ports.
mod range_iterator;
use crate::input::{PortRanges, ScanOrder};
use itertools::Itertools;
use rand::rng;
use rand::seq::SliceRandom;
use range_iterator::RangeIterator;

/// The port ordering for one sweep.
///
/// Ranges keep their memory footprint constant; only `order` materializes
/// the full list.
#[derive(Debug)]
pub enum PortStrategy {
    Manual(Vec<u16>),
    Serial(SerialRange),
    Random(RandomRange),
}

impl PortStrategy {
    /// Builds a strategy from whichever port input the user gave.
    ///
    /// An explicit port list wins over ranges. With nothing supplied the
    /// sweep is empty rather than an error; validation happens upstream.
    #[must_use]
    pub fn pick(ranges: Option<PortRanges>, ports: Option<Vec<u16>>, order: ScanOrder) -> Self {
        match (ports, ranges, order) {
            (Some(ports), _, ScanOrder::Serial) => PortStrategy::Manual(ports),
            (Some(mut ports), _, ScanOrder::Random) => {
                ports.shuffle(&mut rng());
                PortStrategy::Manual(ports)
            }
            (None, Some(ranges), ScanOrder::Serial) => {
                PortStrategy::Serial(SerialRange { ranges: ranges.0 })
            }
            (None, Some(ranges), ScanOrder::Random) => {
                PortStrategy::Random(RandomRange { ranges: ranges.0 })
            }
            (None, None, _) => PortStrategy::Manual(Vec::new()),
        }
    }

    /// The concrete port order for this sweep.
    #[must_use]
    pub fn order(&self) -> Vec<u16> {
        match self {
            PortStrategy::Manual(ports) => ports.clone(),
            PortStrategy::Serial(range) => range.generate(),
            PortStrategy::Random(range) => range.generate(),
        }
    }
}

/// Each strategy flavour generates a full sweep order.
trait RangeOrder {
    fn generate(&self) -> Vec<u16>;
}

/// Yields ports in the order the ranges were given, each port once.
#[derive(Debug)]
pub struct SerialRange {
    ranges: Vec<(u16, u16)>,
}

impl RangeOrder for SerialRange {
    fn generate(&self) -> Vec<u16> {
        self.ranges
            .iter()
            .flat_map(|&(start, end)| start..=end)
            .unique()
            .collect()
    }
}

/// Yields the same port set as [`SerialRange`] but permuted.
///
/// The permutation comes from an additive congruential cycle rather than a
/// shuffle, so consecutive probes land far apart in port space and the
/// iterator never stores the whole sweep.
#[derive(Debug)]
pub struct RandomRange {
    ranges: Vec<(u16, u16)>,
}

impl RangeOrder for RandomRange {
    fn generate(&self) -> Vec<u16> {
        RangeIterator::new(&self.ranges).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::PortStrategy;
    use crate::input::{PortRanges, ScanOrder};
    use std::collections::HashSet;

    fn expected_ports_from_ranges(input: &[(u16, u16)]) -> Vec<u16> {
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
    fn serial_strategy_preserves_input_order() {
        let ranges = PortRanges(vec![(20, 25), (1, 3), (22, 23)]);
        let strategy = PortStrategy::pick(Some(ranges), None, ScanOrder::Serial);

        assert_eq!(strategy.order(), vec![20, 21, 22, 23, 24, 25, 1, 2, 3]);
    }

    #[test]
    fn random_strategy_with_range() {
        let ranges = PortRanges(vec![(1, 10), (20, 30), (100, 110)]);
        let strategy = PortStrategy::pick(Some(ranges.clone()), None, ScanOrder::Random);
        let mut result = strategy.order();
        let expected = expected_ports_from_ranges(&ranges.0);

        assert_ne!(expected, result);
        result.sort_unstable();
        assert_eq!(expected, result);
    }

    #[test]
    fn serial_strategy_with_ports() {
        let strategy = PortStrategy::pick(None, Some(vec![80, 443]), ScanOrder::Serial);
        assert_eq!(strategy.order(), vec![80, 443]);
    }

    #[test]
    fn random_strategy_with_ports() {
        let strategy = PortStrategy::pick(None, Some((1..10).collect()), ScanOrder::Random);
        let mut result = strategy.order();
        let expected = (1..10).collect::<Vec<u16>>();
        assert_ne!(expected, result);

        result.sort_unstable();
        assert_eq!(expected, result);
    }

    #[test]
    fn no_input_means_an_empty_sweep() {
        let strategy = PortStrategy::pick(None, None, ScanOrder::Serial);
        assert!(strategy.order().is_empty());
    }
}
