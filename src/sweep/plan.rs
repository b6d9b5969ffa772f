//! Directional sweep plans.

use crate::sweep::dataset::Polarity;

/// One stage of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepStep {
    /// Visit `setpoints` in order with the given polarity tag.
    Ramp {
        /// Log label such as `"0 to H+"`
        label: &'static str,
        /// Commanded voltages, in order
        setpoints: Vec<f64>,
        /// Sign applied to recorded voltages
        polarity: Polarity,
    },
    /// Block until the operator confirms the magnet leads were swapped.
    ConfirmReversal {
        /// Prompt shown to the operator
        prompt: &'static str,
    },
}

/// Ordered list of steps executed by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    steps: Vec<SweepStep>,
}

const SWAP_PROMPT: &str = "Swap the magnet leads now, press enter when ready";

impl SweepPlan {
    /// Plan from explicit steps.
    pub fn new(steps: Vec<SweepStep>) -> Self {
        Self { steps }
    }

    /// A single ramp, no operator interaction.
    pub fn single(setpoints: Vec<f64>, polarity: Polarity) -> Self {
        Self::new(vec![SweepStep::Ramp {
            label: "single sweep",
            setpoints,
            polarity,
        }])
    }

    /// Full hysteresis loop:
    ///
    /// `0 -> H+`, `H+ -> 0`, swap, `0 -> H-`, `H- -> 0`, swap, `0 -> H+`.
    ///
    /// Forward setpoints are `0, step, 2*step, ...` strictly below `max_voltage`;
    /// the return ramps visit the same values in reverse.
    pub fn hysteresis_loop(max_voltage: f64, step: f64) -> Self {
        let forward = forward_setpoints(max_voltage, step);
        let back: Vec<f64> = forward.iter().rev().copied().collect();
        let ramp = |label, setpoints: &Vec<f64>, polarity| SweepStep::Ramp {
            label,
            setpoints: setpoints.clone(),
            polarity,
        };

        Self::new(vec![
            ramp("0 to H+", &forward, Polarity::Positive),
            ramp("H+ to 0", &back, Polarity::Positive),
            SweepStep::ConfirmReversal {
                prompt: SWAP_PROMPT,
            },
            ramp("0 to H-", &forward, Polarity::Negative),
            ramp("H- to 0", &back, Polarity::Negative),
            SweepStep::ConfirmReversal {
                prompt: SWAP_PROMPT,
            },
            ramp("0 to H+ (return)", &forward, Polarity::Positive),
        ])
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[SweepStep] {
        &self.steps
    }

    /// Total number of setpoints over all ramps.
    pub fn setpoint_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                SweepStep::Ramp { setpoints, .. } => setpoints.len(),
                SweepStep::ConfirmReversal { .. } => 0,
            })
            .sum()
    }
}

/// Largest number of setpoints accepted for one ramp.
pub const MAX_RAMP_SETPOINTS: usize = 10_000;

/// `0, step, 2*step, ...` strictly below `max_voltage`.
///
/// Values are computed from integer indices so they do not drift.
pub fn forward_setpoints(max_voltage: f64, step: f64) -> Vec<f64> {
    if !step.is_finite() || !max_voltage.is_finite() || step <= 0.0 || max_voltage <= 0.0 {
        return Vec::new();
    }
    let count = (max_voltage / step).ceil() as usize;
    (0..count)
        .map(|i| i as f64 * step)
        .filter(|&v| v < max_voltage)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_matches_rig_grid() {
        let forward = forward_setpoints(15.0, 0.25);
        assert_eq!(forward.len(), 60);
        assert_eq!(forward[0], 0.0);
        assert_eq!(forward[1], 0.25);
        assert_eq!(forward[59], 14.75);
    }

    #[test]
    fn forward_excludes_max() {
        assert_eq!(forward_setpoints(1.0, 0.5), vec![0.0, 0.5]);
        assert_eq!(forward_setpoints(1.1, 0.5), vec![0.0, 0.5, 1.0]);
        assert!(forward_setpoints(0.0, 0.5).is_empty());
        assert!(forward_setpoints(1.0, 0.0).is_empty());
    }

    #[test]
    fn hysteresis_loop_structure() {
        let plan = SweepPlan::hysteresis_loop(1.0, 0.5);
        let steps = plan.steps();
        assert_eq!(steps.len(), 7);

        let expected = [
            (vec![0.0, 0.5], Polarity::Positive),
            (vec![0.5, 0.0], Polarity::Positive),
            (vec![0.0, 0.5], Polarity::Negative),
            (vec![0.5, 0.0], Polarity::Negative),
            (vec![0.0, 0.5], Polarity::Positive),
        ];
        let ramps: Vec<(Vec<f64>, Polarity)> = steps
            .iter()
            .filter_map(|step| match step {
                SweepStep::Ramp {
                    setpoints,
                    polarity,
                    ..
                } => Some((setpoints.clone(), *polarity)),
                SweepStep::ConfirmReversal { .. } => None,
            })
            .collect();
        assert_eq!(ramps, expected);

        assert!(matches!(steps[2], SweepStep::ConfirmReversal { .. }));
        assert!(matches!(steps[5], SweepStep::ConfirmReversal { .. }));
        assert_eq!(plan.setpoint_count(), 10);
    }
}
