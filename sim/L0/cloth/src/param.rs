//! Simulation parameters and controller modes.
//!
//! [`SimulationParam`] carries every tunable of the solver. Stiffness values
//! (`spring_k`, `bending_k`) are baked into the topology coefficients, so a
//! change only takes effect at the next
//! [`simulation_init`](crate::ClothManager::simulation_init). Everything else
//! is read at the start of each frame.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ClothError, Result};

/// Controller state.
///
/// ```text
/// NotInitialized --init--> Paused <--mode--> Running
///       ^                     |                 |
///       +------destroy--------+-----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SimulationMode {
    /// No topology or device buffers exist.
    #[default]
    NotInitialized,
    /// Buffers are live but frames do not advance.
    Paused,
    /// Each update advances the cloth.
    Running,
}

impl SimulationMode {
    /// Whether device buffers exist in this mode.
    #[must_use]
    pub const fn is_initialized(self) -> bool {
        !matches!(self, Self::NotInitialized)
    }
}

/// Tunable parameters of the cloth solver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationParam {
    /// Spectral-radius estimate for the Chebyshev schedule, in `(0, 1)`.
    pub rho: f64,
    /// Blend between the Jacobi estimate and the current iterate, in `(0, 1]`.
    pub under_relax: f64,
    /// Upper bound on vertex speed after each step.
    pub velocity_cap: f64,
    /// Number of velocity smoothing passes per step.
    pub lap_damping: u32,
    /// Multiplicative velocity attenuation per step, in `[0, 1]`.
    pub air_damping: f64,
    /// Bending stiffness.
    pub bending_k: f64,
    /// Spring stiffness.
    pub spring_k: f64,
    /// Outer steps per frame.
    pub out_iter: u32,
    /// Jacobi sweeps per outer step.
    pub inner_iter: u32,
    /// Length of one outer step in seconds.
    pub time_step: f64,
    /// Gravitational acceleration.
    pub gravity: Vector3<f64>,
    /// Mass of each vertex.
    pub vertex_mass: f64,
    /// Minimum vertex/triangle separation for the self-collision pass.
    pub self_collision_thickness: f64,
}

impl Default for SimulationParam {
    fn default() -> Self {
        Self {
            rho: 0.996,
            under_relax: 0.5,
            velocity_cap: 1000.0,
            lap_damping: 4,
            air_damping: 0.999,
            bending_k: 1e7,
            spring_k: 2e7,
            out_iter: 8,
            inner_iter: 40,
            time_step: 1.0 / 240.0,
            gravity: Vector3::new(0.0, -9.8, 0.0),
            vertex_mass: 1.0,
            self_collision_thickness: 0.005,
        }
    }
}

impl SimulationParam {
    /// Cheaper frames for dragging around large garments.
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            out_iter: 4,
            inner_iter: 24,
            ..Self::default()
        }
    }

    /// Disable gravity.
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Vector3::zeros();
        self
    }

    /// Set the gravity vector.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Set the iteration counts.
    #[must_use]
    pub fn with_iterations(mut self, out_iter: u32, inner_iter: u32) -> Self {
        self.out_iter = out_iter;
        self.inner_iter = inner_iter;
        self
    }

    /// Inertia term `m / dt²` added to every diagonal.
    #[must_use]
    pub fn inertia(&self) -> f64 {
        self.vertex_mass / (self.time_step * self.time_step)
    }

    /// Check that every parameter lies in its usable range.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidParam`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.rho > 0.0 && self.rho < 1.0) {
            return Err(ClothError::invalid_param(format!(
                "rho must be in (0, 1), got {}",
                self.rho
            )));
        }
        if !(self.under_relax > 0.0 && self.under_relax <= 1.0) {
            return Err(ClothError::invalid_param(format!(
                "under_relax must be in (0, 1], got {}",
                self.under_relax
            )));
        }
        if !(self.air_damping >= 0.0 && self.air_damping <= 1.0) {
            return Err(ClothError::invalid_param(format!(
                "air_damping must be in [0, 1], got {}",
                self.air_damping
            )));
        }
        if !(self.velocity_cap > 0.0) {
            return Err(ClothError::invalid_param(format!(
                "velocity_cap must be positive, got {}",
                self.velocity_cap
            )));
        }
        if !(self.time_step > 0.0 && self.time_step.is_finite()) {
            return Err(ClothError::invalid_param(format!(
                "time_step must be positive, got {}",
                self.time_step
            )));
        }
        if !(self.vertex_mass > 0.0 && self.vertex_mass.is_finite()) {
            return Err(ClothError::invalid_param(format!(
                "vertex_mass must be positive, got {}",
                self.vertex_mass
            )));
        }
        if !(self.spring_k >= 0.0 && self.spring_k.is_finite()) {
            return Err(ClothError::invalid_param(format!(
                "spring_k must be non-negative, got {}",
                self.spring_k
            )));
        }
        if !(self.bending_k >= 0.0 && self.bending_k.is_finite()) {
            return Err(ClothError::invalid_param(format!(
                "bending_k must be non-negative, got {}",
                self.bending_k
            )));
        }
        if !(self.self_collision_thickness >= 0.0) {
            return Err(ClothError::invalid_param(format!(
                "self_collision_thickness must be non-negative, got {}",
                self.self_collision_thickness
            )));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(ClothError::invalid_param("gravity must be finite"));
        }
        Ok(())
    }
}
