//! Vertex/triangle self-collision.
//!
//! After the inner solve, every free vertex closer than `thickness` to a
//! triangle it does not belong to is pushed back to `thickness` along the
//! triangle normal, on the side it came from at the start of the step.
//! Candidate triangles come from a uniform spatial hash over the triangle
//! bounds.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use tracing::debug;

use crate::device::DeviceBuffers;
use crate::kernels::launch_count;

type CellKey = (i64, i64, i64);

/// Uniform grid of triangle indices.
#[derive(Debug, Clone)]
pub struct TriangleHash {
    cell_size: f64,
    cells: HashMap<CellKey, SmallVec<[usize; 8]>>,
}

impl TriangleHash {
    /// Bin every triangle of `t` by its bounds inflated by `margin`.
    #[must_use]
    pub fn build(x: &[Point3<f64>], t: &[[usize; 3]], margin: f64) -> Self {
        let mean_edge = if t.is_empty() {
            0.0
        } else {
            let total: f64 = t
                .iter()
                .map(|f| (x[f[1]] - x[f[0]]).norm() + (x[f[2]] - x[f[1]]).norm())
                .sum();
            total / (2.0 * t.len() as f64)
        };
        let cell_size = mean_edge.max(2.0 * margin).max(1e-6);

        let mut cells: HashMap<CellKey, SmallVec<[usize; 8]>> = HashMap::new();
        for (ti, f) in t.iter().enumerate() {
            let min = x[f[0]].inf(&x[f[1]]).inf(&x[f[2]]) - Vector3::repeat(margin);
            let max = x[f[0]].sup(&x[f[1]]).sup(&x[f[2]]) + Vector3::repeat(margin);
            let lo = cell_of(min, cell_size);
            let hi = cell_of(max, cell_size);
            for cz in lo.2..=hi.2 {
                for cy in lo.1..=hi.1 {
                    for cx in lo.0..=hi.0 {
                        cells.entry((cx, cy, cz)).or_default().push(ti);
                    }
                }
            }
        }

        Self { cell_size, cells }
    }

    /// Triangles whose inflated bounds overlap the cell of `p`.
    #[must_use]
    pub fn candidates(&self, p: Point3<f64>) -> &[usize] {
        self.cells
            .get(&cell_of(p, self.cell_size))
            .map_or(&[][..], SmallVec::as_slice)
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

fn cell_of(p: Point3<f64>, cell_size: f64) -> CellKey {
    (
        (p.x / cell_size).floor() as i64,
        (p.y / cell_size).floor() as i64,
        (p.z / cell_size).floor() as i64,
    )
}

/// Closest point to `p` on triangle `(a, b, c)`.
#[must_use]
pub fn closest_point_on_triangle(
    p: Point3<f64>,
    a: Point3<f64>,
    b: Point3<f64>,
    c: Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1.mul_add(d4, -(d3 * d2));
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5.mul_add(d2, -(d1 * d6));
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3.mul_add(d6, -(d5 * d4));
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Separate free vertices from nearby triangles.
///
/// Returns the number of vertices moved.
pub fn resolve_self_collision(buffers: &mut DeviceBuffers, thickness: f64) -> usize {
    if thickness <= 0.0 || buffers.t.is_empty() {
        return 0;
    }

    // Lanes move vertices that other lanes read as triangle corners.
    let snapshot = buffers.positions.current().to_vec();
    let t = buffers.t.as_slice();
    let old_x = buffers.old_x.as_slice();
    let more_fixed = buffers.more_fixed.as_slice();
    let hash = TriangleHash::build(&snapshot, t, thickness);

    let moved = launch_count(buffers.positions.current_mut(), |i, x| {
        if more_fixed[i] > 0.0 {
            return false;
        }

        let mut best: Option<(f64, Vector3<f64>, f64)> = None;
        for &ti in hash.candidates(snapshot[i]) {
            let f = t[ti];
            if f.contains(&i) {
                continue;
            }
            let (a, b, c) = (snapshot[f[0]], snapshot[f[1]], snapshot[f[2]]);
            let n = (b - a).cross(&(c - a));
            let area2 = n.norm();
            if area2 <= f64::EPSILON {
                continue;
            }
            let n = n / area2;

            let q = closest_point_on_triangle(snapshot[i], a, b, c);
            let dist = (snapshot[i] - q).norm();
            if dist >= thickness || best.is_some_and(|(d, _, _)| d <= dist) {
                continue;
            }

            let side = if (old_x[i] - q).dot(&n) >= 0.0 { 1.0 } else { -1.0 };
            let signed = (snapshot[i] - q).dot(&n) * side;
            best = Some((dist, n * side, signed));
        }

        match best {
            Some((_, n, signed)) => {
                *x = snapshot[i] + n * (thickness - signed);
                true
            }
            None => false,
        }
    });

    if moved > 0 {
        debug!(moved, cells = hash.num_cells(), "self-collision pass");
    }
    moved
}
