//! Least-squares sensor scale fit from `(raw, true)` point pairs.

use serde::Deserialize;

/// Scale CSV schema.
///
/// Expected headers:
/// raw,true
///
/// Example:
/// raw,true
/// 102.0,100.0
/// 505.5,500.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScaleRow {
    pub raw: f32,
    #[serde(rename = "true")]
    pub actual: f32,
}

/// Fitted `true = a·raw + b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineFit {
    pub a: f32,
    pub b: f32,
    /// Points kept after outlier rejection.
    pub used: usize,
    /// RMS residual of the initial fit over all points.
    pub rms: f32,
}

/// Ordinary least squares over all points, then a single refit rejecting
/// residuals beyond 2σ when at least two inliers remain.
pub fn fit_affine(rows: &[ScaleRow]) -> eyre::Result<AffineFit> {
    if rows.len() < 2 {
        eyre::bail!("scale fit requires at least two rows, got {}", rows.len());
    }
    if rows
        .iter()
        .any(|r| !r.raw.is_finite() || !r.actual.is_finite())
    {
        eyre::bail!("scale rows must be finite");
    }
    let pts: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (f64::from(r.raw), f64::from(r.actual)))
        .collect();

    let (a0, b0) = ols(&pts)?;
    let sumsq: f64 = pts
        .iter()
        .map(|(x, y)| {
            let r = y - (a0 * x + b0);
            r * r
        })
        .sum();
    let rms = (sumsq / pts.len() as f64).sqrt();

    let (a, b, used) = robust_refit(&pts, a0, b0, rms, 2.0).unwrap_or((a0, b0, pts.len()));
    Ok(AffineFit {
        a: a as f32,
        b: b as f32,
        used,
        rms: rms as f32,
    })
}

fn ols(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("scale fit cannot determine slope (degenerate X variance)");
    }
    let a = sxy / sxx;
    if !a.is_finite() {
        eyre::bail!("scale fit produced non-finite slope");
    }
    if a == 0.0 {
        eyre::bail!("scale fit produced zero slope");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Refit over inliers `|residual| <= k·rms` using Chan's online covariance
/// update. `None` when nothing was rejected or the inlier set is degenerate.
fn robust_refit(
    pts: &[(f64, f64)],
    a0: f64,
    b0: f64,
    rms: f64,
    k: f64,
) -> Option<(f64, f64, usize)> {
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let mut n_in: usize = 0;
    let mut mean_x = 0.0f64;
    let mut mean_y = 0.0f64;
    let mut cxx = 0.0f64;
    let mut cxy = 0.0f64;

    for &(x, y) in pts {
        if (y - (a0 * x + b0)).abs() > thr {
            continue;
        }
        n_in += 1;
        let n = n_in as f64;
        let dx = x - mean_x;
        let dy = y - mean_y;
        mean_x += dx / n;
        mean_y += dy / n;
        cxx += dx * (x - mean_x);
        cxy += dx * (y - mean_y);
    }

    if n_in < 2 || n_in == pts.len() || !cxx.is_finite() || cxx == 0.0 {
        return None;
    }
    let a = cxy / cxx;
    if !a.is_finite() || a == 0.0 {
        return None;
    }
    Some((a, mean_y - a * mean_x, n_in))
}

pub fn load_scale_csv(path: &std::path::Path) -> eyre::Result<AffineFit> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open scale CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<&str> = headers.iter().collect();
    if actual != ["raw", "true"] {
        eyre::bail!(
            "scale CSV must have headers 'raw,true', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScaleRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    fit_affine(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(raw: f32, actual: f32) -> ScaleRow {
        ScaleRow { raw, actual }
    }

    #[test]
    fn exact_line_recovers_slope_and_intercept() {
        let rows = [row(0.0, 2.1), row(100.0, 101.4), row(200.0, 200.7)];
        let fit = fit_affine(&rows).unwrap();
        assert!((fit.a - 0.993).abs() < 1e-4);
        assert!((fit.b - 2.1).abs() < 1e-3);
        assert_eq!(fit.used, 3);
    }

    #[test]
    fn outlier_is_rejected_on_refit() {
        let mut rows: Vec<ScaleRow> = (0..10)
            .map(|i| row(i as f32 * 100.0, i as f32 * 200.0 + 5.0))
            .collect();
        rows.push(row(450.0, 5000.0));
        let fit = fit_affine(&rows).unwrap();
        assert_eq!(fit.used, 10);
        assert!((fit.a - 2.0).abs() < 1e-4, "a = {}", fit.a);
        assert!((fit.b - 5.0).abs() < 1e-2, "b = {}", fit.b);
    }

    #[test]
    fn unsorted_points_are_fine() {
        let rows = [row(300.0, 600.0), row(100.0, 200.0), row(200.0, 400.0)];
        let fit = fit_affine(&rows).unwrap();
        assert!((fit.a - 2.0).abs() < 1e-6);
        assert!(fit.b.abs() < 1e-4);
    }
}
