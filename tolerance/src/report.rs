//! Report accumulation.
//!
//! A report is the ordered list of one-line check results gathered over a
//! test, plus the logical AND of their verdicts. Only the final verdict is
//! asserted; the lines carry the diagnostic context.

use crate::comparator::{verdict, Comparison};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    lines: Vec<String>,
    passed: bool,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            passed: true,
        }
    }

    /// Append a comparison, returning its verdict.
    pub fn push(&mut self, comparison: Comparison) -> bool {
        self.push_line(comparison.line, comparison.passed)
    }

    /// Append a preformatted line with its verdict.
    pub fn push_line(&mut self, line: impl Into<String>, passed: bool) -> bool {
        let mut line = line.into();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.lines.push(line);
        self.passed &= passed;
        passed
    }

    /// Fold another report into this one.
    pub fn extend(&mut self, other: Report) {
        self.passed &= other.passed;
        self.lines.extend(other.lines);
    }

    /// AND of every verdict pushed so far.
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// True when no line in the report carries a failing verdict.
    ///
    /// This re-reads the text rather than the folded flag, so lines appended
    /// with `push_line` are judged the same way as comparator output.
    pub fn check_final(&self) -> bool {
        let fail = format!("( {} ", verdict(false));
        !self.lines.iter().any(|l| l.contains(&fail))
    }

    /// Lines that carry a failing verdict.
    pub fn failures(&self) -> Vec<&str> {
        let fail = format!("( {} ", verdict(false));
        self.lines
            .iter()
            .filter(|l| l.contains(&fail))
            .map(|l| l.as_str())
            .collect()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for line in &self.lines {
            f.write_str(line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{Comparator, Tolerance};

    #[test]
    fn test_empty_report_passes() {
        let report = Report::new();
        assert!(report.passed());
        assert!(report.check_final());
        assert!(report.is_empty());
        assert_eq!(Report::default(), report);
        assert!(Report::default().passed());
    }

    #[test]
    fn test_fold_and_failures() {
        let cmp = Comparator::new("test_fold");
        let mut report = Report::new();
        assert!(report.push(cmp.check_fracdiff(&1.0, &1.0, "a", Tolerance::FLUX).unwrap()));
        assert!(!report.push(cmp.check_fracdiff(&2.0, &1.0, "b", Tolerance::FLUX).unwrap()));
        assert!(report.push(cmp.check_fracdiff(&1.01, &1.0, "c", Tolerance::FLUX).unwrap()));

        assert!(!report.passed());
        assert!(!report.check_final());
        assert_eq!(report.len(), 3);

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains(" b is "));
    }

    #[test]
    fn test_extend_and_display() {
        let mut a = Report::new();
        a.push_line("[ t ] one is 1 ( PASS : should be 1)", true);
        let mut b = Report::new();
        b.push_line("[ t ] two is 3 ( FAIL : should be 2)\n", false);
        a.extend(b);

        assert_eq!(
            a.to_string(),
            "[ t ] one is 1 ( PASS : should be 1)\n[ t ] two is 3 ( FAIL : should be 2)\n"
        );
        assert!(!a.passed());
        assert!(!a.check_final());
    }
}
