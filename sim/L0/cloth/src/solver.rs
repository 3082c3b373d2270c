//! Per-frame integration loop.
//!
//! # Algorithm Overview
//!
//! ```text
//! For each outer step (out_iter per frame, length time_step):
//!   1. Drag direction: target - x[drag], clamped to 0.1
//!   2. Velocity Laplacian damping (lap_damping passes), air damping,
//!      gravity, provisional step x += v*dt, then lock pinned/dragged lanes
//!   3. inner_iter damped-Jacobi sweeps with Chebyshev weights:
//!        x^ = b / (m/dt² + diag)
//!        y  = under_relax * (x^ - x) + x
//!        x' = omega * (y - x_prev) + x_prev
//!   4. Re-lock constrained lanes, self-collision (feature), body collision,
//!      v = (x - old_x) / dt capped at velocity_cap
//! ```
//!
//! The loop never fails numerically. Runaway vertices are held back by the
//! velocity cap and reported through [`SolverStats::capped_vertices`].

use nalgebra::{Point3, Vector3};
use tracing::{debug, warn};

use crate::aggregate::MergedMesh;
use crate::body::BodyField;
use crate::device::{DeviceBuffers, DeviceLimits};
use crate::error::Result;
use crate::kernels::{self, DragLane};
use crate::param::SimulationParam;
use crate::topology::Topology;

/// Statistics from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverStats {
    /// Outer steps run.
    pub outer_steps: u32,
    /// Jacobi sweeps run across all outer steps.
    pub inner_sweeps: u32,
    /// Chebyshev weight of the last sweep.
    pub final_omega: f64,
    /// Vertex velocities clamped to the cap, summed over outer steps.
    pub capped_vertices: usize,
    /// Body-collision projections, summed over outer steps.
    pub body_contacts: usize,
    /// Self-collision corrections, summed over outer steps.
    pub self_contacts: usize,
    /// Largest vertex speed after the frame.
    pub max_speed: f64,
}

/// Drives the lane kernels over the device buffers.
#[derive(Debug)]
pub struct ClothSolver {
    buffers: DeviceBuffers,
    spring_k: f64,
    stats: SolverStats,
}

impl ClothSolver {
    /// Allocate device buffers for `merged`/`topology`/`body` and upload them.
    ///
    /// # Errors
    ///
    /// Resource errors from [`DeviceBuffers::allocate`] and
    /// [`DeviceBuffers::upload`]. Nothing stays allocated on failure.
    pub fn new(
        merged: &MergedMesh,
        topology: &Topology,
        body: &BodyField,
        limits: &DeviceLimits,
    ) -> Result<Self> {
        let mut buffers = DeviceBuffers::allocate(
            merged.num_vertices(),
            merged.num_triangles(),
            topology.num_slots(),
            body.size_xyz(),
            limits,
        )?;
        buffers.upload(merged, topology, body)?;

        Ok(Self {
            buffers,
            spring_k: topology.spring_k,
            stats: SolverStats::default(),
        })
    }

    /// Device buffers.
    #[must_use]
    pub const fn buffers(&self) -> &DeviceBuffers {
        &self.buffers
    }

    /// Statistics of the last frame.
    #[must_use]
    pub const fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Number of vertex lanes.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.buffers.num_vertices()
    }

    /// Replace the device pin mask.
    ///
    /// # Errors
    ///
    /// Returns a transfer error if `fixed` has the wrong length.
    pub fn upload_fixed(&mut self, fixed: &[f64]) -> Result<()> {
        self.buffers.fixed.upload(fixed)
    }

    /// Advance one frame.
    ///
    /// `drag` is a global vertex index and its target position.
    pub fn step(
        &mut self,
        param: &SimulationParam,
        drag: Option<(usize, Point3<f64>)>,
    ) -> SolverStats {
        let mut stats = SolverStats::default();
        if self.num_vertices() == 0 {
            self.stats = stats;
            return stats;
        }

        for _ in 0..param.out_iter {
            self.outer_step(param, drag, &mut stats);
        }

        stats.max_speed = self
            .buffers
            .v
            .as_slice()
            .iter()
            .map(|v| v.norm())
            .fold(0.0, f64::max);

        if stats.capped_vertices > 0 {
            warn!(
                capped = stats.capped_vertices,
                cap = param.velocity_cap,
                "vertex velocities hit the cap"
            );
        }
        debug!(
            outer = stats.outer_steps,
            sweeps = stats.inner_sweeps,
            omega = stats.final_omega,
            contacts = stats.body_contacts,
            max_speed = stats.max_speed,
            "cloth frame"
        );

        self.stats = stats;
        stats
    }

    fn outer_step(
        &mut self,
        param: &SimulationParam,
        drag: Option<(usize, Point3<f64>)>,
        stats: &mut SolverStats,
    ) {
        let dt = param.time_step;
        let buffers = &mut self.buffers;

        let drag = drag.and_then(|(vertex, target)| {
            let from = *buffers.positions.current().get(vertex)?;
            Some(DragLane {
                vertex,
                dir: kernels::drag_direction(from, target),
            })
        });

        kernels::laplacian_damping(buffers, param.lap_damping);
        kernels::update_after_lap(buffers, param.air_damping, param.gravity, dt);
        kernels::constrain_initial(buffers, drag, param.inertia());

        let mut omega = 1.0;
        for iter in 0..param.inner_iter {
            omega = kernels::chebyshev_omega(iter, param.rho, omega);
            kernels::jacobi_sweep(buffers, self.spring_k, param.under_relax, omega);
            buffers.positions.rotate();
            stats.inner_sweeps += 1;
        }
        stats.final_omega = omega;

        kernels::lock_constrained(buffers, drag);

        #[cfg(feature = "self-collision")]
        {
            stats.self_contacts +=
                crate::collision::resolve_self_collision(buffers, param.self_collision_thickness);
        }

        stats.body_contacts += kernels::body_collision(buffers);
        stats.capped_vertices += kernels::update_velocity(buffers, dt, param.velocity_cap);
        stats.outer_steps += 1;
    }

    /// Copy positions and velocities to the host.
    ///
    /// # Errors
    ///
    /// Returns a transfer error if the host arrays have the wrong length.
    pub fn download(&self, x: &mut [Point3<f64>], v: &mut [Vector3<f64>]) -> Result<()> {
        self.buffers.download_positions(x)?;
        self.buffers.download_velocities(v)
    }

    /// Free the device buffers.
    pub fn release(&mut self) {
        self.buffers.release();
    }
}
