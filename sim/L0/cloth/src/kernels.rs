//! Per-vertex lane kernels.
//!
//! Every pass runs one lane per vertex. A lane reads its inputs through
//! shared slices and writes only its own element of the output slices, so
//! lanes are independent and the `parallel` feature can hand them to rayon
//! without changing results.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "parallel")]
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};

use crate::body::sample_distance;
use crate::body::sample_gradient;
use crate::device::DeviceBuffers;

/// Largest per-step displacement of the dragged vertex.
pub const DRAG_STEP_LIMIT: f64 = 0.1;

/// Fraction of the one-ring velocity Laplacian applied per damping pass.
pub const LAPLACIAN_RATE: f64 = 0.1;

/// Springs shorter than this contribute no direction term.
const MIN_SPRING_LENGTH: f64 = 1e-12;

/// The dragged lane and its displacement for this outer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragLane {
    /// Global vertex index.
    pub vertex: usize,
    /// Clamped displacement from `old_x`.
    pub dir: Vector3<f64>,
}

/// Run `f` for every lane of `out`.
pub fn launch<T, F>(out: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    out.par_iter_mut().enumerate().for_each(|(i, o)| f(i, o));

    #[cfg(not(feature = "parallel"))]
    out.iter_mut().enumerate().for_each(|(i, o)| f(i, o));
}

/// Run `f` for every lane of two equally long outputs.
pub fn launch2<A, B, F>(a: &mut [A], b: &mut [B], f: F)
where
    A: Send,
    B: Send,
    F: Fn(usize, &mut A, &mut B) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .enumerate()
        .for_each(|(i, (a, b))| f(i, a, b));

    #[cfg(not(feature = "parallel"))]
    a.iter_mut()
        .zip(b.iter_mut())
        .enumerate()
        .for_each(|(i, (a, b))| f(i, a, b));
}

/// Run `f` for every lane of three equally long outputs.
pub fn launch3<A, B, C, F>(a: &mut [A], b: &mut [B], c: &mut [C], f: F)
where
    A: Send,
    B: Send,
    C: Send,
    F: Fn(usize, &mut A, &mut B, &mut C) + Sync + Send,
{
    #[cfg(feature = "parallel")]
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .zip(c.par_iter_mut())
        .enumerate()
        .for_each(|(i, ((a, b), c))| f(i, a, b, c));

    #[cfg(not(feature = "parallel"))]
    a.iter_mut()
        .zip(b.iter_mut())
        .zip(c.iter_mut())
        .enumerate()
        .for_each(|(i, ((a, b), c))| f(i, a, b, c));
}

/// Run `f` for every lane and count the lanes where it returns `true`.
pub fn launch_count<T, F>(out: &mut [T], f: F) -> usize
where
    T: Send,
    F: Fn(usize, &mut T) -> bool + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let count = out
        .par_iter_mut()
        .enumerate()
        .map(|(i, o)| usize::from(f(i, o)))
        .sum();

    #[cfg(not(feature = "parallel"))]
    let count = out
        .iter_mut()
        .enumerate()
        .map(|(i, o)| usize::from(f(i, o)))
        .sum();

    count
}

/// Displacement toward the drag target, clamped to [`DRAG_STEP_LIMIT`].
#[must_use]
pub fn drag_direction(from: Point3<f64>, target: Point3<f64>) -> Vector3<f64> {
    let dir = target - from;
    let len = dir.norm();
    if len > DRAG_STEP_LIMIT {
        dir * (DRAG_STEP_LIMIT / len)
    } else {
        dir
    }
}

/// Chebyshev over-relaxation weight for zero-based inner iteration `iter`.
///
/// ```text
/// iter <= 5:  1
/// iter == 6:  2 / (2 - rho²)
/// iter >= 7:  4 / (4 - rho² * omega_prev)
/// ```
#[must_use]
pub fn chebyshev_omega(iter: u32, rho: f64, omega_prev: f64) -> f64 {
    let rho2 = rho * rho;
    match iter {
        0..=5 => 1.0,
        6 => 2.0 / (2.0 - rho2),
        _ => 4.0 / (4.0 - rho2 * omega_prev),
    }
}

/// `passes` rounds of one-ring velocity smoothing.
pub fn laplacian_damping(buffers: &mut DeviceBuffers, passes: u32) {
    let vv = buffers.all_vv.as_slice();
    let vv_num = buffers.all_vv_num.as_slice();

    for _ in 0..passes {
        let v = buffers.v.as_slice();
        launch(buffers.f.as_mut_slice(), |i, f| {
            let row = vv_num[i]..vv_num[i + 1];
            *f = if row.is_empty() {
                Vector3::zeros()
            } else {
                let count = row.len() as f64;
                let sum: Vector3<f64> = vv[row].iter().map(|&j| v[j]).sum();
                sum / count - v[i]
            };
        });

        let f = buffers.f.as_slice();
        launch(buffers.v.as_mut_slice(), |i, v| *v += f[i] * LAPLACIAN_RATE);
    }
}

/// Air damping, gravity and the provisional explicit step.
///
/// Pinned lanes stop; free lanes get `v = air_damping·v + g·dt`. Every lane
/// records `old_x = x` before free lanes advance by `v·dt`.
pub fn update_after_lap(
    buffers: &mut DeviceBuffers,
    air_damping: f64,
    gravity: Vector3<f64>,
    dt: f64,
) {
    let fixed = buffers.fixed.as_slice();
    launch3(
        buffers.positions.current_mut(),
        buffers.old_x.as_mut_slice(),
        buffers.v.as_mut_slice(),
        |i, x, old_x, v| {
            *old_x = *x;
            if fixed[i] > 0.0 {
                *v = Vector3::zeros();
            } else {
                *v = *v * air_damping + gravity * dt;
                *x += *v * dt;
            }
        },
    );
}

/// Lock pinned lanes to `old_x` and the dragged lane to `old_x + dir`.
pub fn lock_constrained(buffers: &mut DeviceBuffers, drag: Option<DragLane>) {
    let old_x = buffers.old_x.as_slice();
    let more_fixed = buffers.more_fixed.as_slice();
    launch(buffers.positions.current_mut(), |i, x| match drag {
        Some(d) if d.vertex == i => *x = old_x[i] + d.dir,
        _ if more_fixed[i] > 0.0 => *x = old_x[i],
        _ => {}
    });
}

/// Start-of-solve constraint pass.
///
/// Builds `more_fixed`, locks constrained lanes, fills the inertial
/// right-hand side `init_b = inertia·x` and diagonal `new_vc = all_vc + inertia`,
/// then seeds the previous and next iterates with `x`.
pub fn constrain_initial(buffers: &mut DeviceBuffers, drag: Option<DragLane>, inertia: f64) {
    let fixed = buffers.fixed.as_slice();
    launch(buffers.more_fixed.as_mut_slice(), |i, m| {
        *m = match drag {
            Some(d) if d.vertex == i => 1.0,
            _ => fixed[i],
        };
    });

    lock_constrained(buffers, drag);

    let x = buffers.positions.current();
    launch(buffers.init_b.as_mut_slice(), |i, b| *b = x[i].coords * inertia);

    let vc = buffers.all_vc.as_slice();
    launch(buffers.new_vc.as_mut_slice(), |i, c| *c = vc[i] + inertia);

    buffers.positions.sync_from_current();
}

/// One damped-Jacobi sweep with Chebyshev extrapolation into the next slot.
///
/// Constrained lanes copy their current position.
pub fn jacobi_sweep(buffers: &mut DeviceBuffers, spring_k: f64, under_relax: f64, omega: f64) {
    let vv = buffers.all_vv.as_slice();
    let vv_num = buffers.all_vv_num.as_slice();
    let vl = buffers.all_vl.as_slice();
    let vw = buffers.all_vw.as_slice();
    let init_b = buffers.init_b.as_slice();
    let new_vc = buffers.new_vc.as_slice();
    let more_fixed = buffers.more_fixed.as_slice();
    let (x, prev, next) = buffers.positions.split();

    launch(next, |i, out| {
        let xi = x[i];
        if more_fixed[i] > 0.0 {
            *out = xi;
            return;
        }

        let mut b = init_b[i];
        for s in vv_num[i]..vv_num[i + 1] {
            let xj = x[vv[s]];
            b -= xj.coords * vw[s];
            if vl[s] >= 0.0 {
                let d = xi - xj;
                let len = d.norm();
                if len > MIN_SPRING_LENGTH {
                    b += d * (spring_k * vl[s] / len);
                }
            }
        }

        let x_hat = b / new_vc[i];
        let y = (x_hat - xi.coords) * under_relax + xi.coords;
        let p = prev[i].coords;
        *out = Point3::from((y - p) * omega + p);
    });
}

/// Push free lanes inside the body out along the field gradient.
///
/// Returns the number of projected lanes.
pub fn body_collision(buffers: &mut DeviceBuffers) -> usize {
    if buffers.phi.is_empty() {
        return 0;
    }
    let phi = buffers.phi.as_slice();
    let layout = buffers.phi_layout;
    let more_fixed = buffers.more_fixed.as_slice();

    launch_count(buffers.positions.current_mut(), |i, x| {
        if more_fixed[i] > 0.0 {
            return false;
        }
        match sample_distance(phi, &layout, *x) {
            Some(d) if d < 0.0 => match sample_gradient(phi, &layout, *x) {
                Some(n) => {
                    *x -= n * d;
                    true
                }
                None => false,
            },
            _ => false,
        }
    })
}

/// Recover velocities from the step displacement, capping their magnitude.
///
/// Returns the number of capped lanes.
pub fn update_velocity(buffers: &mut DeviceBuffers, dt: f64, velocity_cap: f64) -> usize {
    let x = buffers.positions.current();
    let old_x = buffers.old_x.as_slice();
    let inv_dt = 1.0 / dt;

    launch_count(buffers.v.as_mut_slice(), |i, v| {
        *v = (x[i] - old_x[i]) * inv_dt;
        let speed = v.norm();
        if speed > velocity_cap {
            *v *= velocity_cap / speed;
            true
        } else {
            false
        }
    })
}
