//! Classifier verdicts and the waste decision policy.

use serde::{Deserialize, Serialize};

/// Decision thresholds. Both comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum `waste + liquid` probability mass.
    pub sum: f64,
    /// Minimum lead of `waste + liquid` over `none`.
    pub margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            sum: 0.85,
            margin: 0.15,
        }
    }
}

/// Per-class model output plus the derived decision.
///
/// Probabilities are taken as the model reports them; they are not required
/// to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceVerdict {
    waste: f64,
    liquid: f64,
    none: f64,
    margin: f64,
    waste_detected: bool,
}

impl InferenceVerdict {
    pub fn new(waste: f64, liquid: f64, none: f64, thresholds: Thresholds) -> Self {
        let sum = waste + liquid;
        let margin = sum - none;
        Self {
            waste,
            liquid,
            none,
            margin,
            waste_detected: sum > thresholds.sum && margin > thresholds.margin,
        }
    }

    /// Build from raw model output ordered `[waste, liquid, none]`. Missing
    /// entries count as zero.
    pub fn from_outputs(outputs: &[f32], thresholds: Thresholds) -> Self {
        let at = |i: usize| outputs.get(i).copied().map(f64::from).unwrap_or(0.0);
        Self::new(at(0), at(1), at(2), thresholds)
    }

    pub fn waste(&self) -> f64 {
        self.waste
    }

    pub fn liquid(&self) -> f64 {
        self.liquid
    }

    pub fn none(&self) -> f64 {
        self.none
    }

    /// `(waste + liquid) - none`
    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn waste_detected(&self) -> bool {
        self.waste_detected
    }
}

impl std::fmt::Display for InferenceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "waste:{:.3} liquid:{:.3} none:{:.3} margin:{:.3} -> {}",
            self.waste,
            self.liquid,
            self.none,
            self.margin,
            if self.waste_detected { "Y" } else { "N" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clear_detection() {
        let v = InferenceVerdict::new(0.6, 0.3, 0.05, Thresholds::default());
        assert_relative_eq!(v.margin(), 0.85, epsilon = 1e-9);
        assert!(v.waste_detected());
    }

    #[test]
    fn test_none_dominant() {
        let v = InferenceVerdict::new(0.05, 0.05, 0.9, Thresholds::default());
        assert!(!v.waste_detected());
        assert!(v.margin() < 0.0);
    }

    #[test]
    fn test_sum_boundary_is_not_detection() {
        // Dyadic values so the sum lands exactly on the threshold.
        let t = Thresholds { sum: 0.75, margin: 0.25 };
        let v = InferenceVerdict::new(0.5, 0.25, 0.0, t);
        assert_eq!(v.waste() + v.liquid(), 0.75);
        assert!(!v.waste_detected());

        let v = InferenceVerdict::new(0.5, 0.375, 0.0, t);
        assert!(v.waste_detected());
    }

    #[test]
    fn test_margin_boundary_is_not_detection() {
        let t = Thresholds { sum: 0.5, margin: 0.5 };
        let v = InferenceVerdict::new(0.5, 0.5, 0.5, t);
        assert_eq!(v.margin(), 0.5);
        assert!(!v.waste_detected());
    }

    #[test]
    fn test_high_sum_but_low_margin() {
        // Unnormalized output: plenty of mass on both sides.
        let v = InferenceVerdict::new(0.5, 0.45, 0.9, Thresholds::default());
        assert!(!v.waste_detected());
    }

    #[test]
    fn test_from_outputs_pads_missing() {
        let v = InferenceVerdict::from_outputs(&[0.9], Thresholds::default());
        assert_eq!(v.liquid(), 0.0);
        assert_eq!(v.none(), 0.0);
        assert!(v.waste_detected());

        let v = InferenceVerdict::from_outputs(&[], Thresholds::default());
        assert!(!v.waste_detected());
    }

    #[test]
    fn test_display() {
        let v = InferenceVerdict::new(0.5, 0.25, 0.25, Thresholds::default());
        assert_eq!(
            v.to_string(),
            "waste:0.500 liquid:0.250 none:0.250 margin:0.500 -> N"
        );
    }
}
