//! Cumulative vertical-offset tables from raw axis position counts.
//!
//! Positions are MCU step counts that fall as the frame expands; the offset
//! curve is the running sum of per-step decrements, converted to physical
//! length. Tram offsets isolate the shift produced by automatic leveling
//! passes and get the same treatment.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use tracing::warn;

/// Temperature-keyed offset table in physical length units.
pub type OffsetMap = BTreeMap<OrderedFloat<f64>, f64>;

/// Allowed disagreement, in length units, between the reduced cumulative
/// drift and the raw first-minus-last drift before a warning is emitted.
pub const DRIFT_WARN_TOL: f64 = 0.05;

/// Accumulate a dense raw-count series into a cumulative offset curve.
///
/// Each consecutive pair contributes `position[i-1] - position[i]` (falling
/// position means rising offset); the running sum times `unit_distance`
/// forms the table. The first key carries offset zero.
pub fn accumulate(series: impl IntoIterator<Item = (f64, f64)>, unit_distance: f64) -> OffsetMap {
    let mut out = OffsetMap::new();
    let mut prev: Option<f64> = None;
    let mut total = 0.0;
    for (temp, position) in series {
        if let Some(p) = prev {
            total += p - position;
        }
        out.insert(OrderedFloat(temp), total * unit_distance);
        prev = Some(position);
    }
    out
}

/// Drift sanity check: the table's total cumulative drift should roughly
/// match the first-minus-last difference of the raw, unreduced series.
/// A large gap means the reduction discarded too many samples. Advisory
/// only; never alters the table.
pub fn drift_check(raw_positions: &[f64], table: &OffsetMap, unit_distance: f64, axis: &str) {
    let (Some(first), Some(last)) = (raw_positions.first(), raw_positions.last()) else {
        return;
    };
    let raw_total = (first - last) * unit_distance;
    let reduced_total = table.values().next_back().copied().unwrap_or(0.0);
    if (reduced_total - raw_total).abs() > DRIFT_WARN_TOL {
        warn!(
            axis,
            reduced_total, raw_total, "cumulative drift disagrees with raw series"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn descending_position_yields_rising_offset() {
        let table = accumulate(
            [(20.0, 100.0), (25.0, 90.0), (30.0, 70.0)],
            0.0025,
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table[&OrderedFloat(20.0)], 0.0);
        assert_abs_diff_eq!(table[&OrderedFloat(25.0)], 0.025, epsilon = 1e-12);
        assert_abs_diff_eq!(table[&OrderedFloat(30.0)], 0.075, epsilon = 1e-12);
    }

    #[test]
    fn empty_series_yields_empty_table() {
        let table = accumulate(std::iter::empty(), 0.0025);
        assert!(table.is_empty());
    }

    #[test]
    fn single_point_carries_zero_baseline() {
        let table = accumulate([(22.0, 5000.0)], 0.0025);
        assert_eq!(table[&OrderedFloat(22.0)], 0.0);
    }
}
