//! Rotation-scan geometry: converts angles and projection counts into
//! encoder-step settings for the two position-compare pulse generators.
//!
//! `pcomp1` fires a single gate pulse when the stage reaches the start angle;
//! `pcomp2` then emits one pulse per projection, `proj_step` encoder steps
//! apart, starting at `theta0_offset`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppResult, DaqError};
use crate::hardware::panda::{PandaBox, PulseCompareBlock};

/// Step of the start pulse generator; larger than any turn so it fires once.
pub const START_PULSE_STEP: i64 = 1_000_000;

/// Largest allowed deviation of the projection step from an integer.
pub const STEP_TOLERANCE: f64 = 1e-3;

/// Inputs of one rotation scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    /// Encoder steps per full turn
    pub steps_per_turn: u32,
    /// Start angle in degrees
    pub theta0: f64,
    /// Projections per half turn (at least 2)
    pub n_proj: u32,
    /// Repeated series; 0 captures until stopped
    pub n_series: u32,
    /// Offset subtracted from the start position; start of the projection train
    pub theta0_offset: i64,
    /// Clock period in seconds
    pub t_period: f64,
}

/// Settings of one position-compare block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseCompareConfig {
    pub pre_start: i64,
    pub start: i64,
    pub width: i64,
    pub step: i64,
    pub pulses: i64,
}

impl PulseCompareConfig {
    /// Write the settings in register order, each acknowledged before the next.
    pub async fn apply(&self, block: &PulseCompareBlock) -> Result<()> {
        block.pre_start.put(self.pre_start).await?;
        block.start.put(self.start).await?;
        block.width.put(self.width).await?;
        block.step.put(self.step).await?;
        block.pulses.put(self.pulses).await?;
        Ok(())
    }
}

/// Derived encoder-step geometry of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanGeometry {
    pub steps_per_turn: i64,
    pub steps_per_deg: f64,
    pub theta0_steps: i64,
    pub proj_step: i64,
    pub pcomp1: PulseCompareConfig,
    pub pcomp2: PulseCompareConfig,
}

/// Bring a step position into `[0, steps_per_turn)` with a single add or subtract.
///
/// Positions more than one turn outside the range stay out of range.
pub fn wrap_steps(steps: i64, steps_per_turn: i64) -> i64 {
    if steps < 0 {
        steps + steps_per_turn
    } else if steps >= steps_per_turn {
        steps - steps_per_turn
    } else {
        steps
    }
}

impl ScanGeometry {
    /// Compute the pulse-generator settings for `params`.
    ///
    /// # Errors
    /// - `DaqError::Configuration` if `n_proj < 2` or `steps_per_turn == 0`
    /// - `DaqError::NonIntegerStep` if the projection spacing is not an
    ///   integral number of encoder steps
    pub fn compute(params: &ScanParameters) -> AppResult<Self> {
        if params.n_proj < 2 {
            return Err(DaqError::Configuration(format!(
                "n_proj must be at least 2, got {}",
                params.n_proj
            )));
        }
        if params.steps_per_turn == 0 {
            return Err(DaqError::Configuration(
                "steps_per_turn must be positive".to_string(),
            ));
        }

        let steps_per_turn = i64::from(params.steps_per_turn);
        let steps_per_deg = f64::from(params.steps_per_turn) / 360.0;
        let theta0_steps = wrap_steps(
            (params.theta0 * steps_per_deg).round() as i64 - params.theta0_offset,
            steps_per_turn,
        );

        let exact_step = f64::from(params.steps_per_turn) / 2.0 / f64::from(params.n_proj - 1);
        let proj_step = exact_step.round();
        if (proj_step - exact_step).abs() > STEP_TOLERANCE {
            return Err(DaqError::NonIntegerStep {
                proj_step: exact_step,
                n_proj: params.n_proj,
                steps_per_turn: params.steps_per_turn,
            });
        }
        let proj_step = proj_step as i64;

        Ok(Self {
            steps_per_turn,
            steps_per_deg,
            theta0_steps,
            proj_step,
            pcomp1: PulseCompareConfig {
                pre_start: 0,
                start: theta0_steps,
                width: 1,
                step: START_PULSE_STEP,
                pulses: 1,
            },
            pcomp2: PulseCompareConfig {
                pre_start: 0,
                start: params.theta0_offset,
                width: 1,
                step: proj_step,
                pulses: i64::from(params.n_proj),
            },
        })
    }

    /// Program clock, encoder counter and both pulse generators.
    pub async fn apply(&self, panda: &PandaBox, t_period: f64) -> Result<()> {
        debug!(
            theta0_steps = self.theta0_steps,
            proj_step = self.proj_step,
            "Programming pulse generators"
        );

        panda.clock1.period_units.put("s").await?;
        panda.clock1.period.put(t_period).await?;

        panda.counter1.start.put(0).await?;
        panda.counter1.min.put(0).await?;
        panda.counter1.step.put(1).await?;
        panda.counter1.max.put(self.steps_per_turn).await?;

        self.pcomp1.apply(&panda.pcomp1).await?;
        self.pcomp2.apply(&panda.pcomp2).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBus, MockCaptureTable};
    use crate::hardware::signal::SignalValue;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn params(steps_per_turn: u32, theta0: f64, n_proj: u32, offset: i64) -> ScanParameters {
        ScanParameters {
            steps_per_turn,
            theta0,
            n_proj,
            n_series: 1,
            theta0_offset: offset,
            t_period: 0.00002,
        }
    }

    #[test]
    fn test_start_position_with_offset() {
        let geometry = ScanGeometry::compute(&params(8000, 10.0, 161, 1)).unwrap();
        assert_eq!(geometry.theta0_steps, 221);
        assert_eq!(geometry.pcomp1.start, 221);
    }

    #[test]
    fn test_projection_step() {
        let geometry = ScanGeometry::compute(&params(8000, 10.0, 161, 1000)).unwrap();
        assert_eq!(geometry.proj_step, 25);
        assert_eq!(
            geometry.pcomp2,
            PulseCompareConfig {
                pre_start: 0,
                start: 1000,
                width: 1,
                step: 25,
                pulses: 161,
            }
        );
        assert_eq!(geometry.pcomp1.step, START_PULSE_STEP);
        assert_eq!(geometry.pcomp1.pulses, 1);
    }

    #[test]
    fn test_beamline_defaults() {
        // 18000 steps/turn, 181 projections over a half turn
        let geometry = ScanGeometry::compute(&params(18000, 30.0, 181, 1000)).unwrap();
        assert_eq!(geometry.proj_step, 50);
        assert_eq!(geometry.theta0_steps, 500);
    }

    #[test]
    fn test_negative_start_wraps_once() {
        let geometry = ScanGeometry::compute(&params(18000, 0.0, 181, 1000)).unwrap();
        assert_eq!(geometry.theta0_steps, 17000);
    }

    #[test]
    fn test_start_always_within_one_turn() {
        for (steps_per_turn, offset) in [(8000_u32, 1_i64), (18000, 1000), (36000, 0)] {
            let mut theta0 = 0.0;
            while theta0 < 360.0 {
                let geometry =
                    ScanGeometry::compute(&params(steps_per_turn, theta0, 2, offset)).unwrap();
                assert!(
                    (0..i64::from(steps_per_turn)).contains(&geometry.theta0_steps),
                    "theta0={} gave {}",
                    theta0,
                    geometry.theta0_steps
                );
                theta0 += 0.25;
            }
        }
    }

    #[test]
    fn test_non_integer_step_is_rejected() {
        let err = ScanGeometry::compute(&params(8000, 10.0, 322, 1000)).unwrap_err();
        assert!(matches!(err, DaqError::NonIntegerStep { n_proj: 322, .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_integral_step_matches_acceptance() {
        for n_proj in 2..400_u32 {
            let exact = 4000.0 / f64::from(n_proj - 1);
            let accepted = ScanGeometry::compute(&params(8000, 0.0, n_proj, 0)).is_ok();
            assert_eq!(accepted, (exact - exact.round()).abs() <= STEP_TOLERANCE);
        }
    }

    #[test]
    fn test_too_few_projections() {
        let err = ScanGeometry::compute(&params(8000, 10.0, 1, 1000)).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_wrap_steps_single_adjustment() {
        assert_eq!(wrap_steps(-1, 100), 99);
        assert_eq!(wrap_steps(100, 100), 0);
        assert_eq!(wrap_steps(42, 100), 42);
        // Only one adjustment is ever applied
        assert_eq!(wrap_steps(-150, 100), -50);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_apply_writes_registers_in_order() {
        let bus = MockBus::new();
        let panda = PandaBox::new("pnd", "PANDA", &bus, Arc::new(MockCaptureTable::rotation_scan()));
        let geometry = ScanGeometry::compute(&params(8000, 10.0, 161, 1)).unwrap();

        geometry.apply(&panda, 0.00002).await.unwrap();

        let written: Vec<(String, SignalValue)> = bus
            .journal()
            .into_iter()
            .map(|record| (record.pv, record.value))
            .collect();
        let expected: Vec<(String, SignalValue)> = [
            ("PANDA:CLOCK1:PERIOD:UNITS", SignalValue::from("s")),
            ("PANDA:CLOCK1:PERIOD", SignalValue::from(0.00002)),
            ("PANDA:COUNTER1:START", SignalValue::from(0)),
            ("PANDA:COUNTER1:MIN", SignalValue::from(0)),
            ("PANDA:COUNTER1:STEP", SignalValue::from(1)),
            ("PANDA:COUNTER1:MAX", SignalValue::from(8000)),
            ("PANDA:PCOMP1:PRE_START", SignalValue::from(0)),
            ("PANDA:PCOMP1:START", SignalValue::from(221)),
            ("PANDA:PCOMP1:WIDTH", SignalValue::from(1)),
            ("PANDA:PCOMP1:STEP", SignalValue::from(1_000_000)),
            ("PANDA:PCOMP1:PULSES", SignalValue::from(1)),
            ("PANDA:PCOMP2:PRE_START", SignalValue::from(0)),
            ("PANDA:PCOMP2:START", SignalValue::from(1)),
            ("PANDA:PCOMP2:WIDTH", SignalValue::from(1)),
            ("PANDA:PCOMP2:STEP", SignalValue::from(25)),
            ("PANDA:PCOMP2:PULSES", SignalValue::from(161)),
        ]
        .into_iter()
        .map(|(pv, value)| (pv.to_string(), value))
        .collect();
        assert_eq!(written, expected);
        assert!(logs_contain("Programming pulse generators"));
    }
}
