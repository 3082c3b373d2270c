//! Property-based tests for topology construction.
//!
//! Random grids with random in-plane axes and out-of-plane jitter are built
//! into topologies and checked for structural invariants.
//!
//! Run with: cargo test -p sim-cloth -- proptest

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use sim_cloth::topology::apply_row;
use sim_cloth::{ClothPiece, ClothSurface, MergedMesh, Topology};

// =============================================================================
// Strategies
// =============================================================================

/// A non-degenerate pair of grid axes.
fn arb_axes() -> impl Strategy<Value = (Vector3<f64>, Vector3<f64>)> {
    (0.2..3.0f64, 0.2..3.0f64, -0.5..0.5f64).prop_map(|(a, b, shear)| {
        (Vector3::new(a, 0.0, 0.0), Vector3::new(shear * b, 0.0, b))
    })
}

/// A grid piece with optional vertical jitter on every vertex.
fn arb_grid(jitter: f64) -> impl Strategy<Value = ClothPiece> {
    (1usize..6, 1usize..6, arb_axes()).prop_flat_map(move |(u, v, (u_axis, v_axis))| {
        let n = (u + 1) * (v + 1);
        prop::collection::vec(-1.0..1.0f64, n).prop_map(move |offsets| {
            let base = ClothPiece::grid("p", Point3::origin(), u_axis, v_axis, u, v);
            let vertices: Vec<_> = base
                .vertices()
                .iter()
                .zip(&offsets)
                .map(|(p, dy)| p + Vector3::new(0.0, dy * jitter, 0.0))
                .collect();
            let mut piece = base;
            piece.set_vertices(&vertices);
            piece
        })
    })
}

fn build(piece: &ClothPiece, spring_k: f64, bending_k: f64) -> Topology {
    Topology::build(piece.vertices(), piece.triangles(), spring_k, bending_k)
        .expect("grid topology")
}

// =============================================================================
// Structure
// =============================================================================

proptest! {
    #[test]
    fn proptest_edges_are_symmetric(piece in arb_grid(0.3)) {
        let topo = build(&piece, 1.0, 1.0);
        for &(a, b) in &topo.all_e {
            prop_assert!(a != b);
            prop_assert!(topo.all_e.binary_search(&(b, a)).is_ok());
        }
    }

    #[test]
    fn proptest_offsets_are_monotone(piece in arb_grid(0.3)) {
        let topo = build(&piece, 1.0, 1.0);
        let n = piece.num_vertices();
        prop_assert_eq!(topo.all_vv_num.len(), n + 1);
        prop_assert_eq!(topo.all_vv_num[0], 0);
        prop_assert_eq!(topo.all_vv_num[n], topo.all_vv.len());
        prop_assert!(topo.all_vv_num.windows(2).all(|w| w[0] <= w[1]));
        for i in 0..n {
            let ring = topo.neighbors(i);
            prop_assert!(ring.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(!ring.contains(&i));
        }
    }

    #[test]
    fn proptest_rest_lengths_are_symmetric(piece in arb_grid(0.3)) {
        let topo = build(&piece, 1.0, 1.0);
        let x = piece.vertices();
        for q in &topo.quads {
            let s01 = topo.find_neighbor(q.v0, q.v1).unwrap();
            let s10 = topo.find_neighbor(q.v1, q.v0).unwrap();
            prop_assert_eq!(topo.all_vl[s01], topo.all_vl[s10]);
            prop_assert!((topo.all_vl[s01] - (x[q.v1] - x[q.v0]).norm()).abs() < 1e-12);
        }
    }

    #[test]
    fn proptest_coefficients(piece in arb_grid(0.3), spring_k in 0.0..1e3f64, bending_k in 0.0..1e3f64) {
        let topo = build(&piece, spring_k, bending_k);
        for i in 0..piece.num_vertices() {
            let vc = topo.all_vc[i];
            prop_assert!(vc >= 0.0);
            let sum: f64 = vc + topo.row(i).map(|s| topo.all_vw[s]).sum::<f64>();
            prop_assert!(sum.abs() <= 1e-9 * vc.max(1.0), "row {} sums to {}", i, sum);
        }
    }

    #[test]
    fn proptest_bending_edge_count(u in 1usize..6, v in 1usize..6) {
        let piece = ClothPiece::grid("p", Point3::origin(), Vector3::x(), Vector3::z(), u, v);
        let topo = build(&piece, 1.0, 1.0);
        let edges = u * (v + 1) + v * (u + 1) + u * v;
        let boundary = 2 * (u + v);
        prop_assert_eq!(topo.quads.len(), edges);
        prop_assert_eq!(topo.num_bending_edges(), edges - boundary);
    }
}

// =============================================================================
// Bending
// =============================================================================

proptest! {
    #[test]
    fn proptest_flat_grid_has_no_bending_force(piece in arb_grid(0.0)) {
        let topo = build(&piece, 0.0, 1.0);
        let x = piece.vertices();
        let scale = topo.all_vc.iter().fold(1.0f64, |m, &c| m.max(c));
        for i in 0..x.len() {
            let r = apply_row(&topo, x, i);
            prop_assert!(r.norm() <= 1e-9 * scale, "row {} force {}", i, r.norm());
        }
    }

    #[test]
    fn proptest_index_mapping_round_trips(a in arb_grid(0.0), b in arb_grid(0.0)) {
        let merged = MergedMesh::from_pieces(&[a.clone(), b.clone()]);
        prop_assert_eq!(merged.num_vertices(), a.num_vertices() + b.num_vertices());
        for (piece, count) in [(0, a.num_vertices()), (1, b.num_vertices())] {
            for vertex in 0..count {
                let global = merged.global_index(piece, vertex).unwrap();
                prop_assert_eq!(merged.piece_of(global), Some((piece, vertex)));
            }
        }
    }
}
