//! builder.rs
//! Declarative trial description and the builder that turns it into conditions.
//!
//! One trial is normally an open-loop (or sweep) condition followed by a closed-loop one.
//! `TrialSpec` is the serde form used in protocol files; `TrialBuilder` is the in-code form.
//!
//! Precedence rules for conflicting settings, each logged as a warning:
//! - oscillation over rotation
//! - fixed open-loop duration over sweep
//! - bars over starfield

use rand::Rng;
use serde::{Deserialize, Serialize};
use log::warn;

use crate::condition::{
    feedback::SensorConfig, ClosedLoopCondition, Condition, OpenLoopCondition, PhaseTiming,
    SweepCondition,
};
use crate::experiment::trial::Trial;
use crate::stimulus::{
    delay::Delay,
    pattern::{Motion, StimulusPattern},
    starfield::Starfield,
};
use crate::utils::error::{Diagnostic, ExperimentError, Result};

const DEFAULT_OPENLOOP_MS: f64 = 3000.0;
const DEFAULT_CLOSEDLOOP_MS: f64 = 5000.0;
const MAX_RANDOM_SEED: u64 = 10_000;

fn default_openloop_ms() -> Option<f64> {
    Some(DEFAULT_OPENLOOP_MS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialSpec {
    pub id: String,
    pub comment: Option<String>,

    pub rotate_deg_per_sec: f64,
    pub osc_freq_hz: f64,
    pub osc_width_deg: f64,
    pub fg_color: u32,

    #[serde(default = "default_openloop_ms")]
    pub openloop_duration_ms: Option<f64>,
    pub closedloop_duration_ms: f64,
    pub gain: f64,
    pub fps: f64,
    pub pretrial_ms: f64,
    pub posttrial_ms: f64,

    // bars
    pub bar_deg: Option<f64>,
    pub space_deg: Option<f64>,
    pub start_mask_deg: f64,
    pub end_mask_deg: f64,
    /// Sweep count; only used when no open-loop duration is set.
    pub sweep: Option<u32>,
    pub closedloop_bar_deg: Option<f64>,
    pub bg_color: u32,
    pub bar_height: f64,

    // starfield
    pub sphere_count: Option<u32>,
    pub sphere_radius_deg: Option<f64>,
    pub shell_radius: Option<f64>,
    pub seed: Option<u64>,
    pub starfield_closedloop: bool,
}

impl Default for TrialSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            comment: None,
            rotate_deg_per_sec: 0.0,
            osc_freq_hz: 0.0,
            osc_width_deg: 0.0,
            fg_color: 0x00ff00,
            openloop_duration_ms: default_openloop_ms(),
            closedloop_duration_ms: DEFAULT_CLOSEDLOOP_MS,
            gain: 1.0,
            fps: 60.0,
            pretrial_ms: 500.0,
            posttrial_ms: 500.0,
            bar_deg: None,
            space_deg: None,
            start_mask_deg: 0.0,
            end_mask_deg: 0.0,
            sweep: None,
            closedloop_bar_deg: None,
            bg_color: 0x000000,
            bar_height: 0.8,
            sphere_count: None,
            sphere_radius_deg: None,
            shell_radius: None,
            seed: None,
            starfield_closedloop: false,
        }
    }
}

/// Pattern for the closed-loop phase of a bar trial: an opposing pair on half the cylinder
/// for sizes up to 180°, the complementary pair above.
pub fn closed_loop_bar_pattern(bar_deg: f64) -> Result<StimulusPattern> {
    let (bar, space) = if bar_deg > 0.0 && bar_deg <= 180.0 {
        (bar_deg, 180.0 - bar_deg)
    } else if bar_deg > 180.0 && bar_deg <= 360.0 {
        (bar_deg - 180.0, 360.0 - bar_deg)
    } else {
        return Err(ExperimentError::InvalidClosedLoopBar(bar_deg));
    };
    Ok(StimulusPattern::bars(bar, space, Motion::stationary()))
}

impl TrialSpec {
    fn motion(&self, diagnostics: &mut Vec<Diagnostic>) -> Motion {
        if self.osc_freq_hz != 0.0 {
            if self.rotate_deg_per_sec != 0.0 {
                warn!("[TrialBuilder] {}: {}", self.id, Diagnostic::RotationAndOscillation);
                diagnostics.push(Diagnostic::RotationAndOscillation);
            }
            Motion::Oscillation { freq_hz: self.osc_freq_hz, width_deg: self.osc_width_deg }
        } else {
            Motion::Rotation { deg_per_sec: self.rotate_deg_per_sec }
        }
    }

    fn timing(&self) -> PhaseTiming {
        PhaseTiming::new(self.fps, Delay::from_millis(self.pretrial_ms), Delay::from_millis(self.posttrial_ms))
    }

    /// Builds the trial's conditions. Closed-loop phases read the sensor at `sensor`.
    pub fn build(&self, sensor: SensorConfig) -> Result<Trial> {
        let mut diagnostics = Vec::new();
        let motion = self.motion(&mut diagnostics);
        let timing = self.timing();
        let closed_duration = Delay::from_millis(self.closedloop_duration_ms);
        let mut conditions: Vec<Condition> = Vec::new();

        match self.bar_deg {
            Some(bar_deg) if bar_deg > 0.0 => {
                if self.sphere_count.is_some() {
                    warn!("[TrialBuilder] {}: {}", self.id, Diagnostic::BarsAndStarfield);
                    diagnostics.push(Diagnostic::BarsAndStarfield);
                }
                let space_deg = self.space_deg.unwrap_or(bar_deg);
                let pattern = StimulusPattern::bars(bar_deg, space_deg, motion)
                    .with_mask(self.start_mask_deg, self.end_mask_deg)
                    .with_colors(self.fg_color, self.bg_color)
                    .with_bar_height(self.bar_height);

                match (self.openloop_duration_ms, self.sweep) {
                    (Some(ms), sweep) => {
                        if sweep.is_some() {
                            warn!("[TrialBuilder] {}: {}", self.id, Diagnostic::DurationAndSweep);
                            diagnostics.push(Diagnostic::DurationAndSweep);
                        }
                        conditions.push(
                            OpenLoopCondition::new(pattern.clone(), Delay::from_millis(ms))
                                .with_timing(timing.clone())
                                .into(),
                        );
                    }
                    (None, Some(count)) => {
                        conditions.push(
                            SweepCondition::new(pattern.clone())?
                                .with_sweep_count(count)
                                .with_timing(timing.clone())
                                .into(),
                        );
                    }
                    (None, None) => return Err(ExperimentError::MissingOpenLoopTiming(self.id.clone())),
                }

                if let Some(closed_bar) = self.closedloop_bar_deg {
                    let closed_pattern = closed_loop_bar_pattern(closed_bar)?;
                    conditions.push(
                        ClosedLoopCondition::new(closed_pattern, closed_duration, self.gain)
                            .with_timing(timing)
                            .with_sensor(sensor)
                            .into(),
                    );
                }
            }
            _ => {
                let Some(sphere_count) = self.sphere_count else {
                    return Err(ExperimentError::MissingPattern(self.id.clone()));
                };
                let defaults = Starfield::default();
                let seed = self.seed.unwrap_or_else(|| {
                    let seed = rand::rng().random_range(0..MAX_RANDOM_SEED);
                    warn!("[TrialBuilder] {}: no seed set, using random seed {}", self.id, seed);
                    seed
                });
                let field = Starfield::new(
                    sphere_count,
                    self.sphere_radius_deg.unwrap_or(defaults.sphere_radius_deg),
                    self.shell_radius.unwrap_or(defaults.shell_radius),
                    seed,
                    self.fg_color,
                );
                let pattern = StimulusPattern::starfield(field, motion);

                match self.openloop_duration_ms {
                    Some(ms) => conditions.push(
                        OpenLoopCondition::new(pattern.clone(), Delay::from_millis(ms))
                            .with_timing(timing.clone())
                            .into(),
                    ),
                    None => warn!("[TrialBuilder] {}: starfield without open-loop duration", self.id),
                }
                if self.starfield_closedloop {
                    conditions.push(
                        ClosedLoopCondition::new(pattern, closed_duration, self.gain)
                            .with_timing(timing)
                            .with_sensor(sensor)
                            .into(),
                    );
                }
            }
        }

        Ok(Trial::new(self.id.clone(), self.comment.clone(), conditions)?.with_diagnostics(diagnostics))
    }
}

/// Fluent form of [`TrialSpec`].
#[derive(Debug, Clone)]
pub struct TrialBuilder {
    spec: TrialSpec,
    sensor: SensorConfig,
}

impl TrialBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            spec: TrialSpec { id: id.into(), ..TrialSpec::default() },
            sensor: SensorConfig::default(),
        }
    }

    pub fn bars(mut self, bar_deg: f64, space_deg: f64) -> Self {
        self.spec.bar_deg = Some(bar_deg);
        self.spec.space_deg = Some(space_deg);
        self
    }

    /// Equal bar and space.
    pub fn bar(mut self, bar_deg: f64) -> Self {
        self.spec.bar_deg = Some(bar_deg);
        self.spec.space_deg = None;
        self
    }

    pub fn mask(mut self, start_deg: f64, end_deg: f64) -> Self {
        self.spec.start_mask_deg = start_deg;
        self.spec.end_mask_deg = end_deg;
        self
    }

    pub fn colors(mut self, fg: u32, bg: u32) -> Self {
        self.spec.fg_color = fg;
        self.spec.bg_color = bg;
        self
    }

    pub fn bar_height(mut self, height: f64) -> Self {
        self.spec.bar_height = height;
        self
    }

    pub fn starfield(mut self, sphere_count: u32, sphere_radius_deg: f64, shell_radius: f64, seed: u64) -> Self {
        self.spec.sphere_count = Some(sphere_count);
        self.spec.sphere_radius_deg = Some(sphere_radius_deg);
        self.spec.shell_radius = Some(shell_radius);
        self.spec.seed = Some(seed);
        self
    }

    pub fn starfield_closed_loop(mut self, enabled: bool) -> Self {
        self.spec.starfield_closedloop = enabled;
        self
    }

    pub fn rotation(mut self, deg_per_sec: f64) -> Self {
        self.spec.rotate_deg_per_sec = deg_per_sec;
        self
    }

    pub fn oscillation(mut self, freq_hz: f64, width_deg: f64) -> Self {
        self.spec.osc_freq_hz = freq_hz;
        self.spec.osc_width_deg = width_deg;
        self
    }

    pub fn open_loop_duration(mut self, ms: f64) -> Self {
        self.spec.openloop_duration_ms = Some(ms);
        self
    }

    /// Sweep instead of a fixed open-loop duration.
    pub fn sweep(mut self, count: u32) -> Self {
        self.spec.openloop_duration_ms = None;
        self.spec.sweep = Some(count);
        self
    }

    pub fn closed_loop(mut self, bar_deg: f64, duration_ms: f64, gain: f64) -> Self {
        self.spec.closedloop_bar_deg = Some(bar_deg);
        self.spec.closedloop_duration_ms = duration_ms;
        self.spec.gain = gain;
        self
    }

    pub fn closed_loop_duration(mut self, duration_ms: f64) -> Self {
        self.spec.closedloop_duration_ms = duration_ms;
        self
    }

    pub fn gain(mut self, gain: f64) -> Self {
        self.spec.gain = gain;
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.spec.fps = fps;
        self
    }

    pub fn holds(mut self, pretrial_ms: f64, posttrial_ms: f64) -> Self {
        self.spec.pretrial_ms = pretrial_ms;
        self.spec.posttrial_ms = posttrial_ms;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.spec.comment = Some(comment.into());
        self
    }

    pub fn sensor(mut self, sensor: SensorConfig) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn build(self) -> Result<Trial> {
        self.spec.build(self.sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionKind;
    use crate::stimulus::pattern::Layout;

    fn bar_space(c: &Condition) -> (f64, f64) {
        match c.pattern().layout() {
            Layout::Bars(b) => (b.bar_deg, b.space_deg),
            Layout::Starfield(_) => panic!("expected bars"),
        }
    }

    #[test]
    fn default_trial_is_open_then_closed() {
        let trial = TrialBuilder::new("1").bar(60.0).rotation(30.0).closed_loop(30.0, 5000.0, 2.0).build().unwrap();
        let kinds: Vec<ConditionKind> = trial.conditions().iter().map(Condition::kind).collect();
        assert_eq!(kinds, [ConditionKind::OpenLoop, ConditionKind::ClosedLoop]);
        assert_eq!(bar_space(&trial.conditions()[0]), (60.0, 60.0));
        assert_eq!(trial.conditions()[0].trial_duration().milliseconds(), 3000.0);
        assert_eq!(bar_space(&trial.conditions()[1]), (30.0, 150.0));
        match &trial.conditions()[1] {
            Condition::ClosedLoop(c) => assert_eq!(c.gain, 2.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn closed_loop_bar_mapping() {
        let sizes = |b| match closed_loop_bar_pattern(b).unwrap().layout() {
            Layout::Bars(l) => (l.bar_deg, l.space_deg),
            Layout::Starfield(_) => unreachable!(),
        };
        assert_eq!(sizes(15.0), (15.0, 165.0));
        assert_eq!(sizes(180.0), (180.0, 0.0));
        assert_eq!(sizes(240.0), (60.0, 120.0));
        assert_eq!(sizes(360.0), (180.0, 0.0));
        assert!(matches!(closed_loop_bar_pattern(0.0), Err(ExperimentError::InvalidClosedLoopBar(_))));
        assert!(matches!(closed_loop_bar_pattern(361.0), Err(ExperimentError::InvalidClosedLoopBar(_))));
    }

    #[test]
    fn sweep_replaces_fixed_duration() {
        let trial = TrialBuilder::new("s").bars(60.0, 300.0).rotation(-60.0).sweep(1).build().unwrap();
        assert_eq!(trial.conditions().len(), 1);
        assert!(matches!(trial.conditions()[0], Condition::Sweep(_)));
        assert_eq!(trial.conditions()[0].trial_duration().milliseconds(), 5000.0);
    }

    #[test]
    fn duration_takes_precedence_over_sweep() {
        let trial = TrialBuilder::new("d").bars(60.0, 300.0).rotation(10.0).sweep(1).open_loop_duration(100.0)
            .build()
            .unwrap();
        assert!(matches!(trial.conditions()[0], Condition::OpenLoop(_)));
        assert!(trial.diagnostics().contains(&Diagnostic::DurationAndSweep));
    }

    #[test]
    fn oscillation_takes_precedence_over_rotation() {
        let trial = TrialBuilder::new("o").bar(30.0).rotation(10.0).oscillation(1.0, 20.0).build().unwrap();
        assert!(matches!(trial.conditions()[0].pattern().motion(), Motion::Oscillation { .. }));
        assert!(trial.diagnostics().contains(&Diagnostic::RotationAndOscillation));
    }

    #[test]
    fn missing_timing_and_pattern_are_errors() {
        let mut spec = TrialSpec { id: "x".into(), bar_deg: Some(30.0), ..TrialSpec::default() };
        spec.openloop_duration_ms = None;
        assert!(matches!(spec.build(SensorConfig::default()), Err(ExperimentError::MissingOpenLoopTiming(_))));

        let nothing = TrialSpec { id: "y".into(), ..TrialSpec::default() };
        assert!(matches!(nothing.build(SensorConfig::default()), Err(ExperimentError::MissingPattern(_))));
    }

    #[test]
    fn sweep_on_non_sweep_pattern_fails_at_build() {
        let err = TrialBuilder::new("n").bar(30.0).rotation(10.0).sweep(1).build().unwrap_err();
        assert!(matches!(err, ExperimentError::NotASweep { .. }));
    }

    #[test]
    fn starfield_trial_with_closed_loop() {
        let trial = TrialBuilder::new("star")
            .starfield(100, 5.0, 850.0, 3)
            .rotation(20.0)
            .starfield_closed_loop(true)
            .build()
            .unwrap();
        assert_eq!(trial.conditions().len(), 2);
        assert!(matches!(trial.conditions()[1].pattern().layout(), Layout::Starfield(_)));

        let closed_only = TrialSpec {
            id: "c".into(),
            sphere_count: Some(10),
            openloop_duration_ms: None,
            starfield_closedloop: true,
            seed: Some(1),
            ..TrialSpec::default()
        };
        assert_eq!(closed_only.build(SensorConfig::default()).unwrap().conditions().len(), 1);

        let none = TrialSpec { starfield_closedloop: false, ..closed_only };
        assert!(matches!(none.build(SensorConfig::default()), Err(ExperimentError::EmptyTrial(_))));
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: TrialSpec = serde_json::from_str(r#"{"id": "3", "bar_deg": 60, "closedloop_bar_deg": 60}"#).unwrap();
        assert_eq!(spec.openloop_duration_ms, Some(3000.0));
        assert_eq!(spec.gain, 1.0);
        let spec: TrialSpec =
            serde_json::from_str(r#"{"id": "4", "bar_deg": 60, "space_deg": 300, "openloop_duration_ms": null, "sweep": 1}"#)
                .unwrap();
        assert_eq!(spec.openloop_duration_ms, None);
        assert_eq!(spec.sweep, Some(1));
    }
}
