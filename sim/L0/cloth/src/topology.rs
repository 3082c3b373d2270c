//! Edge, bending-quad and one-ring construction.
//!
//! The builder turns the merged triangle soup into the coefficient structure
//! of the implicit system `(M/dt² + L) x = b`, stored row-major so one lane
//! per vertex can run a Jacobi sweep:
//!
//! - `all_e`: sorted, deduplicated directed edges (structural + bending)
//! - `all_vv` / `all_vv_num`: the one-ring graph in CSR form
//! - `all_vl`: rest length per slot, `-1` when the slot carries no spring
//! - `all_vw`: off-diagonal coefficient per slot
//! - `all_vc`: diagonal coefficient per vertex
//!
//! # Bending quads
//!
//! Every interior edge `(x0, x1)` with apexes `x2` (first face) and `x3`
//! (second face) gets the quadratic bending term. With `c01 = cot∠(x0; x1, x2)`
//! and friends,
//!
//! ```text
//! k = (c03 + c04, c01 + c02, -c01 - c03, -c02 - c04)
//! w = 1 / (A0 + A1)
//! ```
//!
//! and `k[a]·k[b]·bending_k·w` lands in row `a`, column `b`. For a planar
//! quad `Σ k[a]·x[a] = 0`, so flat cloth carries no bending force.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{ClothError, Result};

/// Faces below this area get no bending term.
const DEGENERATE_AREA: f64 = 1e-12;

/// An undirected edge with its (up to two) opposite apexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeQuad {
    /// Lower endpoint.
    pub v0: usize,
    /// Higher endpoint.
    pub v1: usize,
    /// Apex of the first incident face.
    pub apex0: Option<usize>,
    /// Apex of the second incident face.
    pub apex1: Option<usize>,
}

impl EdgeQuad {
    /// Whether both apexes exist and differ, i.e. the edge bends.
    #[must_use]
    pub fn is_interior(&self) -> bool {
        matches!((self.apex0, self.apex1), (Some(a), Some(b)) if a != b)
    }
}

/// Connectivity and stiffness coefficients of the merged mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    /// Sorted, deduplicated directed edges.
    pub all_e: Vec<(usize, usize)>,
    /// Flattened one-ring neighbor lists.
    pub all_vv: Vec<usize>,
    /// CSR offsets into `all_vv`, `n + 1` entries.
    pub all_vv_num: Vec<usize>,
    /// Rest length per slot, `-1` when no spring.
    pub all_vl: Vec<f64>,
    /// Off-diagonal coefficient per slot.
    pub all_vw: Vec<f64>,
    /// Diagonal coefficient per vertex.
    pub all_vc: Vec<f64>,
    /// Every undirected mesh edge, in first-seen order.
    pub quads: Vec<EdgeQuad>,
    /// Spring stiffness baked into the coefficients.
    pub spring_k: f64,
    /// Bending stiffness baked into the coefficients.
    pub bending_k: f64,
}

impl Topology {
    /// Build the topology of a merged mesh.
    ///
    /// # Errors
    ///
    /// - [`ClothError::InvalidTopology`] if a triangle indexes past `x` or
    ///   repeats a vertex
    /// - [`ClothError::NonManifoldEdge`] if an edge has more than two faces
    /// - [`ClothError::NeighborNotFound`] if the one-ring graph misses a slot
    ///   the edge list requires
    pub fn build(
        x: &[Point3<f64>],
        t: &[[usize; 3]],
        spring_k: f64,
        bending_k: f64,
    ) -> Result<Self> {
        let n = x.len();
        validate_triangles(n, t)?;

        let quads = collect_quads(t)?;

        let mut all_e = Vec::with_capacity(quads.len() * 2 + quads.len());
        for q in &quads {
            all_e.push((q.v0, q.v1));
            all_e.push((q.v1, q.v0));
            if let (true, Some(a0), Some(a1)) = (q.is_interior(), q.apex0, q.apex1) {
                all_e.push((a0, a1));
                all_e.push((a1, a0));
            }
        }
        all_e.sort_unstable();
        all_e.dedup();

        let (all_vv, all_vv_num) = build_one_ring(n, &all_e);

        let mut topo = Self {
            all_vl: vec![-1.0; all_vv.len()],
            all_vw: vec![0.0; all_vv.len()],
            all_vc: vec![0.0; n],
            all_e,
            all_vv,
            all_vv_num,
            quads,
            spring_k,
            bending_k,
        };
        topo.accumulate_coefficients(x)?;

        debug!(
            vertices = n,
            triangles = t.len(),
            edges = topo.quads.len(),
            slots = topo.all_vv.len(),
            "built cloth topology"
        );

        Ok(topo)
    }

    /// Number of vertices.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.all_vc.len()
    }

    /// Number of one-ring slots.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.all_vv.len()
    }

    /// Slot range of vertex `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.num_vertices()`.
    #[must_use]
    pub fn row(&self, i: usize) -> std::ops::Range<usize> {
        self.all_vv_num[i]..self.all_vv_num[i + 1]
    }

    /// One-ring neighbors of vertex `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.num_vertices()`.
    #[must_use]
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.all_vv[self.row(i)]
    }

    /// Number of interior edges with a bending term.
    #[must_use]
    pub fn num_bending_edges(&self) -> usize {
        self.quads.iter().filter(|q| q.is_interior()).count()
    }

    /// Slot of `j` in the one-ring of `i`.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::NeighborNotFound`] if `j` is not a neighbor of `i`.
    pub fn find_neighbor(&self, i: usize, j: usize) -> Result<usize> {
        let not_found = ClothError::NeighborNotFound {
            vertex: i,
            neighbor: j,
        };
        if i >= self.num_vertices() {
            return Err(not_found);
        }
        let row = self.row(i);
        // Rows are sorted by construction.
        match self.all_vv[row.clone()].binary_search(&j) {
            Ok(offset) => Ok(row.start + offset),
            Err(_) => Err(not_found),
        }
    }

    fn accumulate_coefficients(&mut self, x: &[Point3<f64>]) -> Result<()> {
        let quads = std::mem::take(&mut self.quads);

        for q in &quads {
            let s01 = self.find_neighbor(q.v0, q.v1)?;
            let s10 = self.find_neighbor(q.v1, q.v0)?;

            let rest = (x[q.v1] - x[q.v0]).norm();
            self.all_vl[s01] = rest;
            self.all_vl[s10] = rest;
            self.all_vc[q.v0] += self.spring_k;
            self.all_vc[q.v1] += self.spring_k;
            self.all_vw[s01] -= self.spring_k;
            self.all_vw[s10] -= self.spring_k;

            if let (true, Some(a0), Some(a1)) = (q.is_interior(), q.apex0, q.apex1) {
                let v = [q.v0, q.v1, a0, a1];
                let Some((k, weight)) = bending_stencil(x[v[0]], x[v[1]], x[v[2]], x[v[3]])
                else {
                    debug!(v0 = q.v0, v1 = q.v1, "skipping bending on degenerate quad");
                    continue;
                };

                for a in 0..4 {
                    for b in 0..4 {
                        let c = k[a] * k[b] * self.bending_k * weight;
                        if a == b {
                            self.all_vc[v[a]] += c;
                        } else {
                            let s = self.find_neighbor(v[a], v[b])?;
                            self.all_vw[s] += c;
                        }
                    }
                }
            }
        }

        self.quads = quads;
        Ok(())
    }
}

fn validate_triangles(n: usize, t: &[[usize; 3]]) -> Result<()> {
    for (ti, tri) in t.iter().enumerate() {
        if let Some(&bad) = tri.iter().find(|&&v| v >= n) {
            return Err(ClothError::invalid_topology(format!(
                "triangle {ti} references vertex {bad}, only {n} vertices"
            )));
        }
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return Err(ClothError::invalid_topology(format!(
                "triangle {ti} repeats a vertex: {tri:?}"
            )));
        }
    }
    Ok(())
}

/// Group faces by undirected edge, preserving first-seen edge order.
fn collect_quads(t: &[[usize; 3]]) -> Result<Vec<EdgeQuad>> {
    let mut index: HashMap<(usize, usize), usize> = HashMap::with_capacity(t.len() * 2);
    let mut edges: Vec<((usize, usize), SmallVec<[usize; 2]>)> = Vec::with_capacity(t.len() * 2);

    for (ti, tri) in t.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            let key = if a < b { (a, b) } else { (b, a) };
            let slot = *index.entry(key).or_insert_with(|| {
                edges.push((key, SmallVec::new()));
                edges.len() - 1
            });
            edges[slot].1.push(ti);
        }
    }

    edges
        .into_iter()
        .map(|((v0, v1), faces)| {
            if faces.len() > 2 {
                return Err(ClothError::NonManifoldEdge {
                    v0,
                    v1,
                    faces: faces.len(),
                });
            }
            let apex = |f: usize| t[f].iter().copied().find(|&v| v != v0 && v != v1);
            Ok(EdgeQuad {
                v0,
                v1,
                apex0: faces.first().and_then(|&f| apex(f)),
                apex1: faces.get(1).and_then(|&f| apex(f)),
            })
        })
        .collect()
}

fn build_one_ring(n: usize, all_e: &[(usize, usize)]) -> (Vec<usize>, Vec<usize>) {
    let mut all_vv = Vec::with_capacity(all_e.len());
    let mut all_vv_num = Vec::with_capacity(n + 1);

    let mut e = 0;
    for i in 0..n {
        let begin = all_vv.len();
        all_vv_num.push(begin);
        while e < all_e.len() && all_e[e].0 == i {
            let j = all_e[e].1;
            if all_vv[begin..].last() != Some(&j) {
                all_vv.push(j);
            }
            e += 1;
        }
    }
    all_vv_num.push(all_vv.len());

    (all_vv, all_vv_num)
}

/// Cotangent of the angle at `a` spanned by `b` and `c`.
fn cotangent(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> Option<f64> {
    let ab = b - a;
    let ac = c - a;
    let sin = ab.cross(&ac).norm();
    (sin > DEGENERATE_AREA).then(|| ab.dot(&ac) / sin)
}

fn triangle_area(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> f64 {
    0.5 * (b - a).cross(&(c - a)).norm()
}

/// Bending stencil `k` and area weight of the quad `(x0, x1 | x2, x3)`.
fn bending_stencil(
    x0: Point3<f64>,
    x1: Point3<f64>,
    x2: Point3<f64>,
    x3: Point3<f64>,
) -> Option<([f64; 4], f64)> {
    let a0 = triangle_area(x0, x1, x2);
    let a1 = triangle_area(x0, x1, x3);
    if a0 <= DEGENERATE_AREA || a1 <= DEGENERATE_AREA {
        return None;
    }

    let c01 = cotangent(x0, x1, x2)?;
    let c02 = cotangent(x0, x1, x3)?;
    let c03 = cotangent(x1, x0, x2)?;
    let c04 = cotangent(x1, x0, x3)?;

    let k = [c03 + c04, c01 + c02, -c01 - c03, -c02 - c04];
    Some((k, 1.0 / (a0 + a1)))
}

/// Row `i` of the assembled stiffness matrix applied to `x`.
///
/// # Panics
///
/// Panics if `i` is not a vertex of `topo` or `x` is shorter than
/// `topo.num_vertices()`.
#[must_use]
pub fn apply_row(topo: &Topology, x: &[Point3<f64>], i: usize) -> Vector3<f64> {
    let mut r = x[i].coords * topo.all_vc[i];
    for s in topo.row(i) {
        r += x[topo.all_vv[s]].coords * topo.all_vw[s];
    }
    r
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 0=(0,0) 1=(1,0) 2=(0,1) 3=(1,1), split along 0-3.
    fn unit_square() -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let x = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let t = vec![[0, 1, 3], [0, 3, 2]];
        (x, t)
    }

    #[test]
    fn test_single_quad_structure() {
        let (x, t) = unit_square();
        let topo = Topology::build(&x, &t, 1.0, 1.0).unwrap();

        // Five structural edges plus the 1-2 bending edge, both directions.
        assert_eq!(topo.all_e.len(), 12);
        assert_eq!(topo.all_vv_num, vec![0, 3, 6, 9, 12]);
        assert_eq!(topo.neighbors(1), &[0, 2, 3]);
        assert_eq!(topo.num_bending_edges(), 1);

        let s12 = topo.find_neighbor(1, 2).unwrap();
        assert_relative_eq!(topo.all_vl[s12], -1.0);
        let s03 = topo.find_neighbor(0, 3).unwrap();
        assert_relative_eq!(topo.all_vl[s03], 2.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_quad_apexes() {
        let (x, t) = unit_square();
        let topo = Topology::build(&x, &t, 1.0, 1.0).unwrap();
        let diag = topo
            .quads
            .iter()
            .find(|q| (q.v0, q.v1) == (0, 3))
            .unwrap();
        assert_eq!(diag.apex0, Some(1));
        assert_eq!(diag.apex1, Some(2));

        let boundary = topo.quads.iter().find(|q| (q.v0, q.v1) == (0, 1)).unwrap();
        assert!(!boundary.is_interior());
    }

    #[test]
    fn test_cotangent_stencil_of_square() {
        let (x, _) = unit_square();
        let (k, w) = bending_stencil(x[0], x[3], x[1], x[2]).unwrap();
        for (ki, expected) in k.iter().zip([2.0, 2.0, -2.0, -2.0]) {
            assert_relative_eq!(*ki, expected, epsilon = 1e-12);
        }
        assert_relative_eq!(w, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rows_sum_to_zero() {
        let (x, t) = unit_square();
        let topo = Topology::build(&x, &t, 3.0, 5.0).unwrap();
        for i in 0..topo.num_vertices() {
            let off: f64 = topo.row(i).map(|s| topo.all_vw[s]).sum();
            assert_relative_eq!(topo.all_vc[i] + off, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flat_mesh_has_no_bending_force() {
        let (x, t) = unit_square();
        let topo = Topology::build(&x, &t, 0.0, 1.0).unwrap();
        for i in 0..x.len() {
            assert_relative_eq!(apply_row(&topo, &x, i).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_folded_mesh_has_bending_force() {
        let (mut x, t) = unit_square();
        x[2].z = 0.5;
        let topo = Topology::build(&x, &t, 0.0, 1.0).unwrap();
        assert!(apply_row(&topo, &x, 2).norm() > 1e-3);
    }

    #[test]
    fn test_non_manifold_edge_fails() {
        let x = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let t = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
        let err = Topology::build(&x, &t, 1.0, 1.0).unwrap_err();
        assert!(matches!(
            err,
            ClothError::NonManifoldEdge {
                v0: 0,
                v1: 1,
                faces: 3
            }
        ));
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let (x, _) = unit_square();
        let err = Topology::build(&x, &[[0, 1, 7]], 1.0, 1.0).unwrap_err();
        assert!(matches!(err, ClothError::InvalidTopology(_)));
    }

    #[test]
    fn test_repeated_vertex_fails() {
        let (x, _) = unit_square();
        let err = Topology::build(&x, &[[0, 1, 1]], 1.0, 1.0).unwrap_err();
        assert!(err.is_topology());
    }

    #[test]
    fn test_find_neighbor_miss() {
        let (x, _) = unit_square();
        let topo = Topology::build(&x, &[[0, 1, 3]], 1.0, 1.0).unwrap();
        assert!(matches!(
            topo.find_neighbor(0, 2),
            Err(ClothError::NeighborNotFound {
                vertex: 0,
                neighbor: 2
            })
        ));
        assert!(topo.find_neighbor(9, 0).is_err());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_row_past_last_vertex_panics() {
        let (x, t) = unit_square();
        let topo = Topology::build(&x, &t, 1.0, 1.0).unwrap();
        let _ = topo.row(x.len());
    }

    #[test]
    fn test_isolated_vertex_has_empty_row() {
        let (mut x, t) = unit_square();
        x.push(Point3::new(5.0, 5.0, 5.0));
        let topo = Topology::build(&x, &t, 1.0, 1.0).unwrap();
        assert!(topo.neighbors(4).is_empty());
        assert_eq!(topo.all_vv_num[5], topo.all_vv.len());
        assert_relative_eq!(topo.all_vc[4], 0.0);
    }

    #[test]
    fn test_degenerate_quad_skips_bending() {
        let x = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
        ];
        // First face is collinear.
        let t = vec![[0, 1, 2], [1, 0, 3]];
        let topo = Topology::build(&x, &t, 0.0, 1.0).unwrap();
        assert!(topo.all_vc.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_empty_mesh() {
        let topo = Topology::build(&[], &[], 1.0, 1.0).unwrap();
        assert!(topo.all_e.is_empty());
        assert_eq!(topo.all_vv_num, vec![0]);
    }
}
