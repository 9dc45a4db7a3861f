//! tolerance - Comparison of measured image statistics against reference values
//!
//! This crate holds the numeric core of the stakeholder regression harness:
//!
//! - **Comparator** - fractional, noise-floor and absolute difference checks
//!   with a desired/maximum tolerance band
//! - **Report** - accumulation of one-line pass/fail entries into a single verdict
//! - **Fit** - power-law (spectral index) fit across spectral windows
//! - **Value** - the scalar/array values exchanged with the statistics query
//!
//! # Example
//!
//! ```text
//! use tolerance::{Comparator, Report, Tolerance};
//!
//! let cmp = Comparator::new("test_j1302_ql");
//! let mut report = Report::new();
//! report.push(cmp.check_fracdiff(&0.321, &0.3337, "Frac Diff F_nu vs. on-axis", Tolerance::FLUX)?);
//! assert!(report.check_final());
//! ```

pub mod comparator;
pub mod fit;
pub mod report;
pub mod value;

pub use comparator::{
    verdict, AsValues, Comparator, Comparison, ComparisonError, DiffMode, ExpDict, Expected,
    Match, NoiseEstimates, Tolerance,
};
pub use fit::{fit_power_law, FitError, PowerLawFit};
pub use report::Report;
pub use value::Value;
