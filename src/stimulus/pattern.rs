//! pattern.rs
//! Spatial-temporal stimulus description: what the display shows and how it moves.
//!
//! The arena is a 360° cylinder tiled by alternating bars (bright) and spaces (dark). A pattern
//! with a single bar and a single space filling the whole cylinder can be swept across the
//! ~180° viewport once; one that fills half the cylinder is an opposing-bar pattern.
//!
//! Sweep/closed-loop classification is derived from the geometry and never stored.

use serde::{Deserialize, Serialize};
use log::warn;

use crate::stimulus::{
    channel::{Channel, CorrelationKey, Message},
    delay::{Delay, MAX_HOLD_MS},
    starfield::Starfield,
};
use crate::utils::error::{Diagnostic, ExperimentError, Result};

pub const FULL_CIRCLE_DEG: f64 = 360.0;
pub const DEFAULT_VIEWPORT_DEG: f64 = 180.0;
/// Empirical start angle for opposing-bar patterns in closed loop. Not derived from geometry.
pub const OPPOSING_BAR_START_DEG: f64 = 112.0;

const ANGLE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    Rotation { deg_per_sec: f64 },
    Oscillation { freq_hz: f64, width_deg: f64 },
}

impl Motion {
    pub fn stationary() -> Self {
        Motion::Rotation { deg_per_sec: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarLayout {
    pub bar_deg: f64,
    pub space_deg: f64,
    pub start_mask_deg: f64,
    pub end_mask_deg: f64,
    pub fg_color: u32,
    pub bg_color: u32,
    pub bar_height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Bars(BarLayout),
    Starfield(Starfield),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Bar,
    Space,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StimulusPattern {
    layout: Layout,
    motion: Motion,
    diagnostics: Vec<Diagnostic>,
}

#[inline]
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < ANGLE_EPSILON
}

impl StimulusPattern {
    /// Bar/space grating. Geometry problems are reported as warnings, never rejected.
    pub fn bars(bar_deg: f64, space_deg: f64, motion: Motion) -> Self {
        let mut diagnostics = Vec::new();
        if bar_deg < 0.0 || space_deg < 0.0 {
            diagnostics.push(Diagnostic::NegativeSize { bar: bar_deg, space: space_deg });
        }
        let period = bar_deg + space_deg;
        let remainder = if period > 0.0 { FULL_CIRCLE_DEG % period } else { f64::NAN };
        if !(approx_eq(remainder, 0.0) || approx_eq(remainder, period)) {
            diagnostics.push(Diagnostic::NotSeamless { bar: bar_deg, space: space_deg });
        }
        for d in &diagnostics {
            warn!("[Pattern] {d}");
        }

        Self {
            layout: Layout::Bars(BarLayout {
                bar_deg,
                space_deg,
                start_mask_deg: 0.0,
                end_mask_deg: 0.0,
                fg_color: 0x00ff00,
                bg_color: 0x000000,
                bar_height: 0.8,
            }),
            motion,
            diagnostics,
        }
    }

    pub fn starfield(starfield: Starfield, motion: Motion) -> Self {
        Self { layout: Layout::Starfield(starfield), motion, diagnostics: Vec::new() }
    }

    pub fn with_mask(mut self, start_mask_deg: f64, end_mask_deg: f64) -> Self {
        if start_mask_deg > end_mask_deg {
            let d = Diagnostic::InvertedMask { start: start_mask_deg, end: end_mask_deg };
            warn!("[Pattern] {d}");
            self.diagnostics.push(d);
        }
        if let Layout::Bars(bars) = &mut self.layout {
            bars.start_mask_deg = start_mask_deg;
            bars.end_mask_deg = end_mask_deg;
        }
        self
    }

    pub fn with_colors(mut self, fg_color: u32, bg_color: u32) -> Self {
        match &mut self.layout {
            Layout::Bars(bars) => {
                bars.fg_color = fg_color;
                bars.bg_color = bg_color;
            }
            Layout::Starfield(field) => field.color = fg_color,
        }
        self
    }

    pub fn with_bar_height(mut self, bar_height: f64) -> Self {
        if let Layout::Bars(bars) = &mut self.layout {
            bars.bar_height = bar_height;
        }
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn motion(&self) -> Motion {
        self.motion
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn bar_space(&self) -> Option<(f64, f64)> {
        match &self.layout {
            Layout::Bars(b) => Some((b.bar_deg, b.space_deg)),
            Layout::Starfield(_) => None,
        }
    }

    /// Rotation speed in deg/s; zero for oscillating motion.
    pub fn rotation_deg_per_sec(&self) -> f64 {
        match self.motion {
            Motion::Rotation { deg_per_sec } => deg_per_sec,
            Motion::Oscillation { .. } => 0.0,
        }
    }

    pub fn is_bar_sweep(&self) -> bool {
        self.bar_space()
            .is_some_and(|(bar, space)| bar < space && approx_eq(bar + space, FULL_CIRCLE_DEG))
    }

    pub fn is_space_sweep(&self) -> bool {
        self.bar_space()
            .is_some_and(|(bar, space)| bar > space && approx_eq(bar + space, FULL_CIRCLE_DEG))
    }

    pub fn is_opposing_bar_sweep(&self) -> bool {
        self.bar_space()
            .is_some_and(|(bar, space)| approx_eq(bar + space, FULL_CIRCLE_DEG / 2.0))
    }

    pub fn sweep_kind(&self) -> Option<SweepKind> {
        if self.is_bar_sweep() {
            Some(SweepKind::Bar)
        } else if self.is_space_sweep() {
            Some(SweepKind::Space)
        } else {
            None
        }
    }

    /// Time for the leading edge to enter and the trailing edge to leave a viewport of
    /// `viewport_deg`: `(viewport + 2·size) / |rotation| · 1000` ms.
    pub fn sweep_duration(&self, viewport_deg: f64) -> Result<Delay> {
        let (bar, space) = match (&self.layout, self.motion) {
            (Layout::Starfield(_), _) => return Err(ExperimentError::SweepOnStarfield),
            (_, Motion::Oscillation { .. }) => return Err(ExperimentError::SweepOnOscillation),
            (Layout::Bars(b), Motion::Rotation { .. }) => (b.bar_deg, b.space_deg),
        };
        let speed = self.rotation_deg_per_sec().abs();
        if speed == 0.0 || !speed.is_finite() {
            return Err(ExperimentError::UndefinedSweepDuration(self.rotation_deg_per_sec()));
        }
        let size = match self.sweep_kind() {
            Some(SweepKind::Bar) => bar,
            Some(SweepKind::Space) => space,
            None => return Err(ExperimentError::NotASweep { bar, space }),
        };
        let milliseconds = (viewport_deg + 2.0 * size) / speed * 1000.0;
        if !milliseconds.is_finite() || milliseconds > MAX_HOLD_MS {
            return Err(ExperimentError::SweepTooLong(milliseconds));
        }
        Ok(Delay::from_millis(milliseconds))
    }

    /// Orientation placing the pattern just outside the viewport, ahead of the motion.
    pub fn sweep_start_angle(&self) -> f64 {
        let forward = self.rotation_deg_per_sec() > 0.0;
        match (self.sweep_kind(), self.bar_space()) {
            (Some(SweepKind::Bar), Some((bar, _))) => if forward { 90.0 } else { 270.0 + bar },
            (Some(SweepKind::Space), Some((_, space))) => if forward { 90.0 - space } else { 270.0 },
            _ => {
                warn!("[Pattern] not a two-item pattern, sweep starts at 0°");
                0.0
            }
        }
    }

    /// Orientation with a bright/dark edge in front of the animal.
    pub fn closed_loop_start_angle(&self) -> f64 {
        if self.is_bar_sweep() {
            180.0
        } else if self.is_space_sweep() {
            let space = self.bar_space().map_or(0.0, |(_, s)| s);
            FULL_CIRCLE_DEG - space / 2.0
        } else if self.is_opposing_bar_sweep() {
            OPPOSING_BAR_START_DEG
        } else {
            warn!("[Pattern] not a two-item pattern, closed loop starts at 0°");
            0.0
        }
    }

    /// Full oscillation cycle (`2 / freq_hz` seconds) for oscillating motion.
    pub fn oscillation_period(&self) -> Option<Delay> {
        match self.motion {
            Motion::Oscillation { freq_hz, .. } if freq_hz > 0.0 => {
                Some(Delay::from_millis(2.0 / freq_hz * 1000.0))
            }
            _ => None,
        }
    }

    // ========================================================================
    // Channel emissions
    // ========================================================================

    pub fn trigger_spatial(&self, channel: &dyn Channel) {
        let key = CorrelationKey::now();
        let message = match &self.layout {
            Layout::Bars(b) => Message::SpatialSetup {
                key,
                bar_rad: b.bar_deg.to_radians(),
                space_rad: b.space_deg.to_radians(),
                start_mask_rad: b.start_mask_deg.to_radians(),
                end_mask_rad: b.end_mask_deg.to_radians(),
                fg_color: b.fg_color,
                bg_color: b.bg_color,
                bar_height: b.bar_height,
            },
            Layout::Starfield(field) => Message::StarfieldSetup {
                key,
                sphere_count: field.sphere_count,
                sphere_radius_rad: field.sphere_radius_deg.to_radians(),
                shell_radius: field.shell_radius,
                color: field.color,
                points: field.points().to_vec(),
            },
        };
        channel.emit(message);
    }

    pub fn trigger_rotation(&self, channel: &dyn Channel) {
        let key = CorrelationKey::now();
        match self.motion {
            Motion::Rotation { deg_per_sec } => {
                channel.emit(Message::Speed { key, rad_per_sec: deg_per_sec.to_radians() });
            }
            Motion::Oscillation { freq_hz, width_deg } => {
                channel.emit(Message::Oscillation { key, freq_hz, width_rad: width_deg.to_radians() });
            }
        }
    }

    /// Freeze in place.
    pub fn trigger_stop(&self, channel: &dyn Channel) {
        let key = CorrelationKey::now();
        channel.emit(Message::Speed { key, rad_per_sec: 0.0 });
        if matches!(self.motion, Motion::Oscillation { .. }) {
            channel.emit(Message::Oscillation { key, freq_hz: 0.0, width_rad: 0.0 });
        }
    }

    pub fn trigger_sweep_start_position(&self, channel: &dyn Channel) {
        let key = CorrelationKey::now();
        channel.emit(Message::RotateTo { key, angle_rad: self.sweep_start_angle().to_radians() });
    }

    pub fn trigger_closed_loop_start_position(&self, channel: &dyn Channel) {
        let key = CorrelationKey::now();
        channel.emit(Message::RotateTo { key, angle_rad: self.closed_loop_start_angle().to_radians() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::channel::ChannelSender;

    fn rotating(bar: f64, space: f64, speed: f64) -> StimulusPattern {
        StimulusPattern::bars(bar, space, Motion::Rotation { deg_per_sec: speed })
    }

    #[test]
    fn narrow_bar_on_full_circle_is_bar_sweep() {
        let p = rotating(60.0, 300.0, -60.0);
        assert!(p.is_bar_sweep());
        assert!(!p.is_space_sweep());
        assert!(!p.is_opposing_bar_sweep());
        assert_eq!(p.sweep_duration(DEFAULT_VIEWPORT_DEG).unwrap().milliseconds(), 5000.0);
    }

    #[test]
    fn wide_bar_on_full_circle_is_space_sweep() {
        let p = rotating(300.0, 60.0, 30.0);
        assert!(p.is_space_sweep());
        assert!(!p.is_bar_sweep());
        // (180 + 2·60) / 30 · 1000
        assert_eq!(p.sweep_duration(180.0).unwrap().milliseconds(), 10_000.0);
    }

    #[test]
    fn half_circle_pair_is_opposing_bar() {
        let p = rotating(15.0, 165.0, 0.0);
        assert!(p.is_opposing_bar_sweep());
        assert!(!p.is_bar_sweep());
        assert!(!p.is_space_sweep());
        assert_eq!(p.closed_loop_start_angle(), OPPOSING_BAR_START_DEG);
    }

    #[test]
    fn classification_consistent_over_divisors_of_circle() {
        for bar in [1.0, 5.0, 15.0, 30.0, 60.0, 90.0, 120.0, 179.0, 181.0, 300.0, 359.0] {
            let space = 360.0 - bar;
            let p = rotating(bar, space, 10.0);
            let kinds = [p.is_bar_sweep(), p.is_space_sweep()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "bar {bar}");
            assert_eq!(p.is_bar_sweep(), bar < space);
            assert!(!p.is_opposing_bar_sweep());
        }
        let repeating = rotating(30.0, 30.0, 10.0);
        assert!(repeating.sweep_kind().is_none());
        assert!(!repeating.is_opposing_bar_sweep());
    }

    #[test]
    fn doubling_speed_halves_sweep_duration() {
        for speed in [5.0, 30.0, -45.0, 120.0] {
            let slow = rotating(10.0, 350.0, speed).sweep_duration(180.0).unwrap();
            let fast = rotating(10.0, 350.0, 2.0 * speed).sweep_duration(180.0).unwrap();
            assert!((slow.milliseconds() - 2.0 * fast.milliseconds()).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_rotation_sweep_is_rejected() {
        let err = rotating(60.0, 300.0, 0.0).sweep_duration(180.0).unwrap_err();
        assert!(matches!(err, ExperimentError::UndefinedSweepDuration(_)));
    }

    #[test]
    fn crawling_sweep_is_rejected() {
        let err = rotating(10.0, 350.0, 1e-17).sweep_duration(180.0).unwrap_err();
        assert!(matches!(err, ExperimentError::SweepTooLong(ms) if ms > MAX_HOLD_MS));
        // half a day still fits
        let slow = rotating(10.0, 350.0, 400.0 / 86_400.0).sweep_duration(180.0).unwrap();
        assert!((slow.milliseconds() - MAX_HOLD_MS / 2.0).abs() < 1e-3);
    }

    #[test]
    fn non_sweep_pattern_is_rejected() {
        let err = rotating(30.0, 30.0, 10.0).sweep_duration(180.0).unwrap_err();
        assert!(matches!(err, ExperimentError::NotASweep { .. }));
    }

    #[test]
    fn sweep_start_angles_follow_direction() {
        assert_eq!(rotating(60.0, 300.0, 10.0).sweep_start_angle(), 90.0);
        assert_eq!(rotating(60.0, 300.0, -10.0).sweep_start_angle(), 330.0);
        assert_eq!(rotating(300.0, 60.0, 10.0).sweep_start_angle(), 30.0);
        assert_eq!(rotating(300.0, 60.0, -10.0).sweep_start_angle(), 270.0);
        assert_eq!(rotating(30.0, 30.0, 10.0).sweep_start_angle(), 0.0);
    }

    #[test]
    fn closed_loop_start_angle_table() {
        assert_eq!(rotating(60.0, 300.0, 0.0).closed_loop_start_angle(), 180.0);
        assert_eq!(rotating(300.0, 60.0, 0.0).closed_loop_start_angle(), 330.0);
        assert_eq!(rotating(45.0, 45.0, 0.0).closed_loop_start_angle(), 0.0);
    }

    #[test]
    fn seamless_check_is_advisory() {
        let p = rotating(50.0, 60.0, 10.0);
        assert_eq!(p.diagnostics(), &[Diagnostic::NotSeamless { bar: 50.0, space: 60.0 }]);
        assert!(rotating(30.0, 15.0, 10.0).diagnostics().is_empty());
        assert!(rotating(60.0, 300.0, 10.0).diagnostics().is_empty());
    }

    #[test]
    fn stop_on_oscillation_also_zeroes_oscillation() {
        let (channel, rx) = ChannelSender::new();
        let p = StimulusPattern::bars(30.0, 30.0, Motion::Oscillation { freq_hz: 1.0, width_deg: 20.0 });
        p.trigger_stop(&channel);
        let msgs: Vec<_> = rx.try_iter().map(|e| e.message).collect();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_stop());
        assert!(matches!(msgs[1], Message::Oscillation { freq_hz, width_rad, .. } if freq_hz == 0.0 && width_rad == 0.0));
        assert_eq!(msgs[0].key(), msgs[1].key());
    }

    #[test]
    fn spatial_setup_is_in_radians() {
        let (channel, rx) = ChannelSender::new();
        rotating(90.0, 270.0, 10.0).with_mask(10.0, 20.0).trigger_spatial(&channel);
        match rx.try_recv().unwrap().message {
            Message::SpatialSetup { bar_rad, space_rad, start_mask_rad, end_mask_rad, .. } => {
                assert!((bar_rad - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
                assert!((space_rad - 1.5 * std::f64::consts::PI).abs() < 1e-12);
                assert!((start_mask_rad - 10f64.to_radians()).abs() < 1e-12);
                assert!((end_mask_rad - 20f64.to_radians()).abs() < 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn starfield_points_generated_on_first_setup() {
        let (channel, rx) = ChannelSender::new();
        let p = StimulusPattern::starfield(Starfield::new(10, 5.0, 100.0, 3, 0), Motion::stationary());
        if let Layout::Starfield(field) = p.layout() {
            assert!(!field.points_generated());
        }
        p.trigger_spatial(&channel);
        match rx.try_recv().unwrap().message {
            Message::StarfieldSetup { points, .. } => assert_eq!(points.len(), 10),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(p.sweep_duration(180.0), Err(ExperimentError::SweepOnStarfield)));
    }

    #[test]
    fn oscillation_period_is_two_over_frequency() {
        let p = StimulusPattern::bars(30.0, 30.0, Motion::Oscillation { freq_hz: 0.5, width_deg: 10.0 });
        assert_eq!(p.oscillation_period().unwrap().milliseconds(), 4000.0);
        assert!(rotating(30.0, 30.0, 10.0).oscillation_period().is_none());
    }
}
