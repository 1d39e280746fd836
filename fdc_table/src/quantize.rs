//! Deterministic rounding of temperatures onto a fixed-resolution grid.
//!
//! Keys produced here are reused as table lookups across the pipeline, so
//! the result must be bit-stable: quantizing twice yields the same float.

/// Number of fractional digits in `step`'s shortest display form.
///
/// `0.1` has 1, `0.25` has 2, `1` has 0. This is the precision used for
/// display and for the final rounding of every grid key.
pub fn decimals(step: f64) -> u32 {
    let text = format!("{}", step);
    match text.split_once('.') {
        Some((_, frac)) => frac.len() as u32,
        None => 0,
    }
}

/// Snap `value` onto the `step` grid, rounded to the grid's display precision.
///
/// Idempotent: `quantize(quantize(x, s), s) == quantize(x, s)` for finite
/// inputs. NaN/inf inputs are a caller precondition violation; the function
/// itself never fails.
pub fn quantize(value: f64, step: f64) -> f64 {
    let snapped = (value / step).round() * step;
    round_to(snapped, decimals(step))
}

/// Round `value` to `digits` places after the decimal point.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_follows_display_form() {
        assert_eq!(decimals(0.1), 1);
        assert_eq!(decimals(0.25), 2);
        assert_eq!(decimals(1.0), 0);
        assert_eq!(decimals(5.0), 0);
    }

    #[test]
    fn quantize_snaps_to_grid() {
        assert_eq!(quantize(24.73, 0.1), 24.7);
        assert_eq!(quantize(24.78, 0.1), 24.8);
        assert_eq!(quantize(21.0, 5.0), 20.0);
        assert_eq!(quantize(23.13, 0.25), 23.25);
    }

    #[test]
    fn quantize_is_idempotent() {
        for step in [0.05, 0.1, 0.25, 0.5, 1.0] {
            let mut x = 17.003;
            while x < 45.0 {
                let once = quantize(x, step);
                assert_eq!(quantize(once, step), once, "x={} step={}", x, step);
                x += 0.317;
            }
        }
    }
}
