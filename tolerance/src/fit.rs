//! Power-law fit across spectral windows.
//!
//! Fits `log10(S) = alpha * (log10(nu) - log10(nu0)) + log10(S0)` by ordinary
//! least squares. Parameter covariance is scaled by the residual variance, so
//! the reported errors match a standard unweighted curve fit.

use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("need at least 2 points to fit, got {0}")]
    TooFewPoints(usize),
    #[error("frequency and flux arrays differ in length ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("non-positive value {value} at index {index} cannot be fitted in log space")]
    NonPositive { index: usize, value: f64 },
    #[error("all frequencies are identical")]
    Degenerate,
}

/// Result of a power-law fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawFit {
    /// Spectral index
    pub alpha: f64,
    /// Flux density at the reference frequency
    pub f_nu0: f64,
    /// Fitted intercept, `log10(f_nu0)`
    pub intercept: f64,
    /// One-sigma errors of (alpha, intercept); infinite with no degrees of freedom
    pub perr: (f64, f64),
}

/// Fit a power law to flux densities measured at several frequencies.
///
/// # Arguments
/// * `freqs` - Frequencies (any unit, same as `nu0`)
/// * `fluxes` - Flux densities, must be positive
/// * `nu0` - Reference frequency
pub fn fit_power_law(freqs: &[f64], fluxes: &[f64], nu0: f64) -> Result<PowerLawFit, FitError> {
    if freqs.len() != fluxes.len() {
        return Err(FitError::LengthMismatch(freqs.len(), fluxes.len()));
    }
    let n = freqs.len();
    if n < 2 {
        return Err(FitError::TooFewPoints(n));
    }
    for (index, &value) in freqs.iter().chain(fluxes.iter()).enumerate() {
        if value <= 0.0 || value.is_nan() {
            return Err(FitError::NonPositive {
                index: index % n,
                value,
            });
        }
    }

    let log_nu0 = nu0.log10();
    let x: Array1<f64> = freqs.iter().map(|f| f.log10() - log_nu0).collect();
    let y: Array1<f64> = fluxes.iter().map(|s| s.log10()).collect();

    let nf = n as f64;
    let sx = x.sum();
    let sy = y.sum();
    let sxx = x.dot(&x);
    let sxy = x.dot(&y);
    if x.iter().all(|&v| v == x[0]) {
        return Err(FitError::Degenerate);
    }
    let det = nf * sxx - sx * sx;

    let alpha = (nf * sxy - sx * sy) / det;
    let intercept = (sy - alpha * sx) / nf;

    let residuals = &y - &(&x * alpha + intercept);
    let ssr = residuals.dot(&residuals);
    let dof = n.saturating_sub(2);
    let perr = if dof == 0 {
        (f64::INFINITY, f64::INFINITY)
    } else {
        let s2 = ssr / dof as f64;
        ((s2 * nf / det).sqrt(), (s2 * sxx / det).sqrt())
    };

    Ok(PowerLawFit {
        alpha,
        f_nu0: 10f64.powf(intercept),
        intercept,
        perr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_power_law_recovered() {
        let alpha = -0.7;
        let s0 = 0.3337;
        let freqs = [2.028, 2.796, 3.564];
        let fluxes: Vec<f64> = freqs.iter().map(|f| s0 * (f / 3.0f64).powf(alpha)).collect();

        let fit = fit_power_law(&freqs, &fluxes, 3.0).unwrap();
        assert_relative_eq!(fit.alpha, alpha, epsilon = 1e-10);
        assert_relative_eq!(fit.f_nu0, s0, epsilon = 1e-10);
        assert_relative_eq!(fit.perr.0, 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_noisy_fit_has_finite_errors() {
        let freqs = [2.028, 2.796, 3.564];
        let fluxes = [0.3024486, 0.324606597, 0.30785725];
        let fit = fit_power_law(&freqs, &fluxes, 3.0).unwrap();
        assert!(fit.perr.0.is_finite() && fit.perr.0 > 0.0);
        assert!(fit.perr.1.is_finite() && fit.perr.1 > 0.0);
        assert!(fit.f_nu0 > 0.29 && fit.f_nu0 < 0.34);
    }

    #[test]
    fn test_two_points_have_no_error_estimate() {
        let fit = fit_power_law(&[2.0, 4.0], &[1.0, 0.5], 3.0).unwrap();
        assert_relative_eq!(fit.alpha, -1.0, epsilon = 1e-12);
        assert!(fit.perr.0.is_infinite());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            fit_power_law(&[1.0], &[1.0], 3.0),
            Err(FitError::TooFewPoints(1))
        );
        assert_eq!(
            fit_power_law(&[1.0, 2.0], &[1.0], 3.0),
            Err(FitError::LengthMismatch(2, 1))
        );
        assert!(matches!(
            fit_power_law(&[1.0, 2.0], &[1.0, -0.1], 3.0),
            Err(FitError::NonPositive { index: 1, .. })
        ));
        assert_eq!(
            fit_power_law(&[2.0, 2.0, 2.0], &[1.0, 1.1, 0.9], 3.0),
            Err(FitError::Degenerate)
        );
    }
}
