//! Interpolation engine: dense temperature-keyed tables from reduced anchors.
//!
//! Two strategies share one seam. `Linear` fills each consecutive anchor
//! pair with a half-open `[T0, T1)` grid of step multiples, matching the
//! segment-wise behavior of the original tooling. `Spline` fits one natural
//! cubic spline per channel through the whole reduced sequence, resamples it
//! uniformly, and optionally denoises the resampled series with a
//! full-window polynomial filter, producing a single globally consistent
//! curve without segment-boundary discontinuities.

use ndarray::{Array1, Array2};

use crate::quantize::{decimals, quantize};
use crate::reduce::Series;
use crate::FdcError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Linear,
    Spline,
}

#[derive(Clone, Debug)]
pub struct InterpConfig {
    /// Temperature grid resolution in degC.
    pub step: f64,
    /// Symmetric outer extrapolation margin in degC (`Linear` only).
    pub extra_temp: f64,
    /// Apply the full-window polynomial filter to spline resamples.
    pub smoothing: bool,
    /// Polynomial order of the smoothing filter.
    pub smoothing_order: usize,
}

/// Produce a dense table from reduced anchors.
///
/// `values` holds one row per anchor temperature and one column per scalar
/// channel (a mesh cell or an axis position series). Requires at least two
/// anchors with strictly increasing temperatures.
pub fn interpolate(
    strategy: Strategy,
    temps: &[f64],
    values: &Array2<f64>,
    cfg: &InterpConfig,
) -> Result<Series<Array1<f64>>, FdcError> {
    if temps.len() != values.nrows() {
        return Err(FdcError::InvalidParameter(format!(
            "{} anchor temperatures for {} value rows",
            temps.len(),
            values.nrows()
        )));
    }
    if temps.len() < 2 {
        return Err(FdcError::InsufficientData(
            "interpolation needs at least 2 reduced samples".into(),
        ));
    }
    if !(cfg.step > 0.0) {
        return Err(FdcError::InvalidParameter(format!(
            "step must be positive, got {}",
            cfg.step
        )));
    }
    if temps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(FdcError::InvalidParameter(
            "anchor temperatures must be strictly increasing".into(),
        ));
    }

    match strategy {
        Strategy::Linear => Ok(linear_fill(temps, values, cfg)),
        Strategy::Spline => spline_fill(temps, values, cfg),
    }
}

fn linear_fill(temps: &[f64], values: &Array2<f64>, cfg: &InterpConfig) -> Series<Array1<f64>> {
    let n = temps.len();
    let mut out = Series::new();
    let pair_slope =
        |i: usize| (&values.row(i + 1) - &values.row(i)) / (temps[i + 1] - temps[i]);

    // Leading margin extrapolates the first pair's slope backward.
    if cfg.extra_temp > 0.0 {
        let coeff = pair_slope(0);
        for t in step_grid(temps[0] - cfg.extra_temp, temps[0], cfg.step, temps[0]) {
            let key = quantize(t, cfg.step);
            if key >= temps[0] {
                // margin grids may be offset from the step grid; a key that
                // rounds up onto the first anchor belongs to the pair loop
                continue;
            }
            out.push(key, &values.row(0) + &(&coeff * (t - temps[0])));
        }
    }

    for i in 0..n - 1 {
        let (t0, t1) = (temps[i], temps[i + 1]);
        if quantize(t0 + cfg.step, cfg.step) == t1 {
            // Single-step gap: the anchor row itself, no synthetic midpoints.
            out.push(t0, values.row(i).to_owned());
            continue;
        }
        let coeff = pair_slope(i);
        for t in step_grid(t0, t1, cfg.step, t1) {
            out.push(
                quantize(t, cfg.step),
                &values.row(i) + &(&coeff * (t - t0)),
            );
        }
    }

    // Trailing margin extrapolates the last pair's slope forward. The upper
    // bound stays exclusive, so with a zero margin the final anchor closes
    // the table from the preceding segment.
    if cfg.extra_temp > 0.0 {
        let coeff = pair_slope(n - 2);
        let tn = temps[n - 1];
        for t in step_grid(tn, tn + cfg.extra_temp, cfg.step, tn + cfg.extra_temp) {
            out.push(
                quantize(t, cfg.step),
                &values.row(n - 1) + &(&coeff * (t - tn)),
            );
        }
    }

    out
}

/// Half-open `[low, high)` grid of `step` multiples, stepped in integer
/// space so the generated temperatures carry no accumulated float drift.
/// The scale covers both the display width of `anchor` and the step's
/// decimal resolution.
fn step_grid(low: f64, high: f64, step: f64, anchor: f64) -> Vec<f64> {
    let exponent = format!("{}", anchor).len().max(decimals(step) as usize);
    let scale = 10f64.powi(exponent as i32);
    let hi = (high * scale).round() as i64;
    let incr = (step * scale).round() as i64;
    let mut cursor = (low * scale).round() as i64;
    let mut out = Vec::new();
    while cursor < hi {
        out.push(cursor as f64 / scale);
        cursor += incr;
    }
    out
}

fn spline_fill(
    temps: &[f64],
    values: &Array2<f64>,
    cfg: &InterpConfig,
) -> Result<Series<Array1<f64>>, FdcError> {
    let lo = temps[0];
    let hi = temps[temps.len() - 1];
    let count = ((hi - lo) / cfg.step).round() as usize + 1;
    if cfg.smoothing && count <= cfg.smoothing_order {
        return Err(FdcError::InsufficientData(format!(
            "smoothing order {} needs more than {} resampled points",
            cfg.smoothing_order, count
        )));
    }

    // Linear spacing, not exact step multiples; the true grid keys come
    // from quantizing each resampled temperature afterwards.
    let denom = (count - 1).max(1) as f64;
    let grid: Vec<f64> = (0..count)
        .map(|i| lo + (hi - lo) * i as f64 / denom)
        .collect();

    let channels = values.ncols();
    let mut resampled = Array2::zeros((count, channels));
    for ch in 0..channels {
        let ys: Vec<f64> = values.column(ch).to_vec();
        let spline = CubicSpline::fit(temps, &ys)?;
        let mut series: Vec<f64> = grid.iter().map(|&t| spline.eval(t)).collect();
        if cfg.smoothing {
            series = polyfit_smooth(&series, cfg.smoothing_order)?;
        }
        for (i, v) in series.into_iter().enumerate() {
            resampled[(i, ch)] = v;
        }
    }

    let mut out = Series::new();
    for (i, &t) in grid.iter().enumerate() {
        out.push(quantize(t, cfg.step), resampled.row(i).to_owned());
    }
    Ok(out)
}

/// Natural cubic spline through strictly increasing knots. Out-of-range
/// queries extrapolate the boundary segment.
struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    // Half second-derivative coefficients at each knot; all zero for the
    // two-knot case, which degenerates to a straight line.
    c: Vec<f64>,
}

impl CubicSpline {
    fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, FdcError> {
        let n = xs.len();
        if n < 2 {
            return Err(FdcError::InsufficientData(
                "spline fit needs at least 2 knots".into(),
            ));
        }
        let mut c = vec![0.0; n];
        if n > 2 {
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            let mut alpha = vec![0.0; n];
            for i in 1..n - 1 {
                alpha[i] =
                    3.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
            }
            let mut l = vec![1.0; n];
            let mut mu = vec![0.0; n];
            let mut z = vec![0.0; n];
            for i in 1..n - 1 {
                l[i] = 2.0 * (xs[i + 1] - xs[i - 1]) - h[i - 1] * mu[i - 1];
                mu[i] = h[i] / l[i];
                z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
            }
            for j in (1..n - 1).rev() {
                c[j] = z[j] - mu[j] * c[j + 1];
            }
        }
        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            c,
        })
    }

    fn eval(&self, x: f64) -> f64 {
        let j = find_interval(&self.xs, x);
        let h = self.xs[j + 1] - self.xs[j];
        let b = (self.ys[j + 1] - self.ys[j]) / h - h * (self.c[j + 1] + 2.0 * self.c[j]) / 3.0;
        let d = (self.c[j + 1] - self.c[j]) / (3.0 * h);
        let dx = x - self.xs[j];
        self.ys[j] + b * dx + self.c[j] * dx * dx + d * dx * dx * dx
    }
}

/// Binary search for the segment containing `x`, clamped to the boundary
/// segments for out-of-range queries.
fn find_interval(xs: &[f64], x: f64) -> usize {
    let n = xs.len();
    if x <= xs[0] {
        return 0;
    }
    if x >= xs[n - 1] {
        return n - 2;
    }
    let mut lo = 0;
    let mut hi = n - 1;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if x < xs[mid] {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    lo
}

/// Zero-phase global denoise: one least-squares polynomial of `order` fit
/// across the entire series, evaluated back at every sample. Equivalent to
/// a Savitzky-Golay filter whose window spans the whole series.
fn polyfit_smooth(values: &[f64], order: usize) -> Result<Vec<f64>, FdcError> {
    let n = values.len();
    if n <= order {
        return Err(FdcError::InsufficientData(format!(
            "polynomial order {} needs more than {} points",
            order, n
        )));
    }
    // Sample index mapped to [-1, 1] keeps the normal equations well
    // conditioned for the usual order-5 fit.
    let xs: Vec<f64> = (0..n)
        .map(|i| 2.0 * i as f64 / (n - 1).max(1) as f64 - 1.0)
        .collect();
    let m = order + 1;
    let mut g = vec![vec![0.0; m]; m];
    let mut r = vec![0.0; m];
    for (&x, &y) in xs.iter().zip(values.iter()) {
        let mut pow = vec![1.0; 2 * m - 1];
        for k in 1..2 * m - 1 {
            pow[k] = pow[k - 1] * x;
        }
        for j in 0..m {
            r[j] += y * pow[j];
            for k in 0..m {
                g[j][k] += pow[j + k];
            }
        }
    }
    let coeffs = solve_dense(&mut g, &mut r)?;
    Ok(xs
        .iter()
        .map(|&x| {
            let mut acc = 0.0;
            for j in (0..m).rev() {
                acc = acc * x + coeffs[j];
            }
            acc
        })
        .collect())
}

/// Gaussian elimination with partial pivoting for the small (order+1)²
/// normal-equation system.
fn solve_dense(g: &mut [Vec<f64>], r: &mut [f64]) -> Result<Vec<f64>, FdcError> {
    let m = r.len();
    for col in 0..m {
        let pivot = (col..m)
            .max_by(|&a, &b| {
                g[a][col]
                    .abs()
                    .partial_cmp(&g[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if g[pivot][col].abs() < 1e-12 {
            return Err(FdcError::InvalidParameter(
                "singular smoothing system".into(),
            ));
        }
        g.swap(col, pivot);
        r.swap(col, pivot);
        let prow = g[col].clone();
        let rcol = r[col];
        for row in col + 1..m {
            let f = g[row][col] / prow[col];
            for k in col..m {
                g[row][k] -= f * prow[k];
            }
            r[row] -= f * rcol;
        }
    }
    let mut x = vec![0.0; m];
    for row in (0..m).rev() {
        let mut acc = r[row];
        for k in row + 1..m {
            acc -= g[row][k] * x[k];
        }
        x[row] = acc / g[row][row];
    }
    Ok(x)
}
