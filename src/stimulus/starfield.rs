//! starfield.rs
//! Starfield layout: spheres scattered on a shell around the subject.
//!
//! Sphere positions are derived from the seed the first time they are needed and cached, so the
//! open-loop and closed-loop phases of a trial show the same field.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{f64::consts::TAU, sync::OnceLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Starfield {
    pub sphere_count: u32,
    pub sphere_radius_deg: f64,
    pub shell_radius: f64,
    pub seed: u64,
    pub color: u32,
    #[serde(skip)]
    points: OnceLock<Vec<[f64; 3]>>,
}

impl Starfield {
    pub fn new(sphere_count: u32, sphere_radius_deg: f64, shell_radius: f64, seed: u64, color: u32) -> Self {
        Self {
            sphere_count,
            sphere_radius_deg,
            shell_radius,
            seed,
            color,
            points: OnceLock::new(),
        }
    }

    /// Sphere centres, uniformly distributed on the shell.
    pub fn points(&self) -> &[[f64; 3]] {
        self.points.get_or_init(|| generate_points(self.sphere_count, self.shell_radius, self.seed))
    }

    pub fn points_generated(&self) -> bool {
        self.points.get().is_some()
    }
}

impl Default for Starfield {
    fn default() -> Self {
        Self::new(500, 30.0, 850.0, 0, 0x00ff00)
    }
}

fn generate_points(count: u32, radius: f64, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let theta = TAU * rng.random::<f64>();
            let phi = (2.0 * rng.random::<f64>() - 1.0).acos();
            [
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_lie_on_shell() {
        let field = Starfield::new(64, 5.0, 850.0, 42, 0xffffff);
        for p in field.points() {
            let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!((r - 850.0).abs() < 1e-6);
        }
    }

    #[test]
    fn same_seed_same_field() {
        let a = Starfield::new(16, 5.0, 10.0, 7, 0);
        let b = Starfield::new(16, 5.0, 10.0, 7, 0);
        assert_eq!(a.points(), b.points());
        let c = Starfield::new(16, 5.0, 10.0, 8, 0);
        assert_ne!(a.points(), c.points());
    }

    #[test]
    fn generated_lazily_and_cached() {
        let field = Starfield::new(8, 5.0, 10.0, 1, 0);
        assert!(!field.points_generated());
        let first = field.points().as_ptr();
        assert!(field.points_generated());
        assert_eq!(first, field.points().as_ptr());
    }
}
