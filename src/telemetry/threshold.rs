/// Default upper pH limit for a freshwater tank.
pub const DEFAULT_PH_THRESHOLD: f64 = 8.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    pub should_alert: bool,
}

/// Upper-bound check for pH readings.
///
/// Each monitored parameter gets its own evaluator type since limits differ
/// in unit and direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhEvaluator {
    max: f64,
}

impl PhEvaluator {
    pub fn new(max: f64) -> Self {
        Self { max }
    }

    pub fn threshold(&self) -> f64 {
        self.max
    }

    /// Alert iff `reading` is strictly above the limit. NaN never alerts.
    pub fn evaluate(&self, reading: f64) -> AlertDecision {
        AlertDecision {
            should_alert: reading > self.max,
        }
    }
}

impl Default for PhEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_PH_THRESHOLD)
    }
}
