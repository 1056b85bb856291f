//! Small numeric helpers shared by the normalization, model and test modules.

use std::cmp::Ordering;

pub use statrs::function::gamma::{digamma, ln_gamma};

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance (n - 1 denominator); NaN below two observations.
pub fn variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64
}

/// Sample standard deviation.
pub fn sd(x: &[f64]) -> f64 {
    variance(x).sqrt()
}

/// Sort a copy ascending, NaN-tolerant.
pub fn sorted(x: &[f64]) -> Vec<f64> {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

pub fn median(x: &[f64]) -> f64 {
    quantile(x, 0.5)
}

/// Quantile with linear interpolation between order statistics
/// (the default "type 7" definition).
pub fn quantile(x: &[f64], p: f64) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    quantile_sorted(&sorted(x), p)
}

/// [`quantile`] on data that is already sorted ascending.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Ranks with ties replaced by their average rank (1-based).
///
/// Also returns the size of every tie group, for tie corrections.
pub fn rank_average(x: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut ties = Vec::new();
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        let avg = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        if j > i {
            ties.push(j - i + 1);
        }
        i = j + 1;
    }
    (ranks, ties)
}

/// Trigamma function, the derivative of digamma.
pub fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    // asymptotic expansion in 1/x
    acc + 1.0 / x
        + x2 / 2.0
        + (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 * (1.0 / 30.0)))) * x2 / x
}

/// Solve `trigamma(y) = x` for y by Newton iteration.
pub fn trigamma_inverse(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }
    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}

/// Tetragamma function, the derivative of trigamma.
pub fn tetragamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc - x2 * (1.0 + 1.0 / x + x2 * (0.5 - x2 * (1.0 / 6.0 - x2 * (1.0 / 6.0 - x2 * 0.3))))
}

/// Mode of a sample using a Gaussian kernel density estimate.
///
/// Bandwidth is Silverman's rule of thumb; the density is evaluated on a
/// 512-point grid spanning the data plus three bandwidths.
pub fn kde_mode(x: &[f64]) -> f64 {
    let finite: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    if finite.len() == 1 {
        return finite[0];
    }
    let s = sorted(&finite);
    let n = s.len() as f64;
    let iqr = quantile_sorted(&s, 0.75) - quantile_sorted(&s, 0.25);
    let spread = sd(&s).min(iqr / 1.34);
    let spread = if spread > 0.0 { spread } else { sd(&s) };
    if !(spread > 0.0) {
        return s[0];
    }
    let bw = 0.9 * spread * n.powf(-0.2);

    const GRID: usize = 512;
    let lo = s[0] - 3.0 * bw;
    let hi = s[s.len() - 1] + 3.0 * bw;
    let step = (hi - lo) / (GRID - 1) as f64;
    (0..GRID)
        .map(|k| {
            let g = lo + k as f64 * step;
            let density: f64 = s.iter().map(|v| (-0.5 * ((g - v) / bw).powi(2)).exp()).sum();
            (g, density)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
        .map(|(g, _)| g)
        .unwrap_or(f64::NAN)
}

/// Locally weighted linear regression of `y` on `x` (Cleveland's lowess).
///
/// `f` is the span as a fraction of the points; `iterations` robustness
/// passes reweight by bisquare of the residuals. Returns `(x, fitted)`
/// sorted by `x`.
pub fn lowess(x: &[f64], y: &[f64], f: f64, iterations: usize) -> (Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..x.len().min(y.len())).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();
    let n = xs.len();
    if n < 2 {
        return (xs, ys);
    }

    let span = ((f * n as f64).ceil() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for pass in 0..=iterations {
        for i in 0..n {
            // nearest `span` neighbours of xs[i] form a contiguous window
            let (mut lo, mut hi) = (i, i);
            while hi - lo + 1 < span {
                if lo == 0 {
                    hi += 1;
                } else if hi == n - 1 || xs[i] - xs[lo - 1] <= xs[hi + 1] - xs[i] {
                    lo -= 1;
                } else {
                    hi += 1;
                }
            }
            let h = (xs[i] - xs[lo]).max(xs[hi] - xs[i]);

            let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for j in lo..=hi {
                let u = if h > 0.0 { (xs[j] - xs[i]).abs() / h } else { 0.0 };
                let tricube = if u < 1.0 { (1.0 - u.powi(3)).powi(3) } else { 0.0 };
                let w = tricube * robustness[j];
                sw += w;
                swx += w * xs[j];
                swy += w * ys[j];
                swxx += w * xs[j] * xs[j];
                swxy += w * xs[j] * ys[j];
            }
            fitted[i] = if sw <= 0.0 {
                ys[i]
            } else {
                let xbar = swx / sw;
                let ybar = swy / sw;
                let sxx = swxx / sw - xbar * xbar;
                if sxx > 1e-12 * (1.0 + xbar * xbar) {
                    let slope = (swxy / sw - xbar * ybar) / sxx;
                    ybar + slope * (xs[i] - xbar)
                } else {
                    ybar
                }
            };
        }

        if pass == iterations {
            break;
        }
        let residuals: Vec<f64> = ys.iter().zip(&fitted).map(|(y, f)| (y - f).abs()).collect();
        let cmad = 6.0 * median(&residuals);
        // fit is already exact relative to the residual size
        if !(cmad >= 1e-7 * mean(&residuals)) || cmad == 0.0 {
            break;
        }
        let (c1, c9) = (0.001 * cmad, 0.999 * cmad);
        for (r, &res) in robustness.iter_mut().zip(&residuals) {
            *r = if res <= c1 {
                1.0
            } else if res <= c9 {
                (1.0 - (res / cmad).powi(2)).powi(2)
            } else {
                0.0
            };
        }
    }

    (xs, fitted)
}

/// Linear interpolation of the curve `(xs, ys)` at `x0`; `xs` must be
/// sorted. Values outside the range take the nearest end point.
pub fn interpolate(xs: &[f64], ys: &[f64], x0: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return f64::NAN;
    }
    if x0 <= xs[0] {
        return ys[0];
    }
    if x0 >= xs[n - 1] {
        return ys[n - 1];
    }
    let k = xs[..n].partition_point(|&v| v <= x0);
    let (x1, x2) = (xs[k - 1], xs[k]);
    let (y1, y2) = (ys[k - 1], ys[k]);
    if x2 > x1 {
        y1 + (y2 - y1) * (x0 - x1) / (x2 - x1)
    } else {
        y1
    }
}
