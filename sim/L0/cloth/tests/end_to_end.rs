//! End-to-end tests driving the cloth simulation through `ClothManager`.
//!
//! Each test builds pieces, initializes, runs frames and checks the published
//! vertex positions.

use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use sim_cloth::{
    BodyField, ClothError, ClothManager, ClothPiece, ClothSurface, DeviceLimits, DragInfo,
    SimulationMode, SimulationParam,
};

/// Horizontal unit sheet in the XZ plane at height `y`.
fn sheet(y: f64, segments: usize) -> ClothPiece {
    ClothPiece::grid(
        "sheet",
        Point3::new(0.0, y, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
        segments,
        segments,
    )
}

fn running(manager: &mut ClothManager) {
    manager.simulation_init().unwrap();
    manager.set_simulation_mode(SimulationMode::Running).unwrap();
}

#[test]
fn rest_grid_with_fixed_corners_stays_put() {
    let mut manager = ClothManager::new();
    let piece = sheet(0.0, 2);
    let corners = piece.corner_vertices().unwrap();
    let start = piece.vertices().to_vec();
    manager.add_cloth_piece(piece);
    manager
        .set_simulation_param(SimulationParam::default().zero_gravity())
        .unwrap();

    manager.simulation_init().unwrap();
    for c in corners {
        manager.set_vertex_fixed(0, c, 1.0).unwrap();
    }
    manager.set_simulation_mode(SimulationMode::Running).unwrap();

    for _ in 0..5 {
        manager.simulation_update(None).unwrap();
    }

    for (p, q) in manager.positions().iter().zip(&start) {
        assert_relative_eq!(*p, *q, epsilon = 1e-6);
    }
    for v in manager.velocities() {
        assert!(v.norm() < 1e-6);
    }
}

#[test]
fn corner_pinned_cloth_hangs_under_gravity() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 4));
    manager.simulation_init().unwrap();
    manager.set_vertex_fixed(0, 0, 1.0).unwrap();
    manager.set_simulation_mode(SimulationMode::Running).unwrap();

    let cap = manager.simulation_param().velocity_cap;
    for _ in 0..10 {
        let stats = manager.simulation_update(None).unwrap();
        assert_eq!(stats.capped_vertices, 0);
        assert!(stats.max_speed < cap);
    }

    let x = manager.positions();
    assert_eq!(x[0], Point3::origin());
    assert!(x.iter().all(|p| p.coords.iter().all(|c| c.is_finite())));
    let mean_y = x.iter().map(|p| p.y).sum::<f64>() / x.len() as f64;
    assert!(mean_y < 0.0, "cloth did not sag: mean y = {mean_y}");
    assert!(x[24].y < 0.0, "free corner y = {}", x[24].y);

    // The piece sees the same positions as the merged mesh.
    let piece = manager.cloth_piece(0).unwrap();
    assert_eq!(piece.vertices(), x);
}

#[test]
fn drag_moves_at_most_step_limit_per_outer_step() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 2));
    manager
        .set_simulation_param(SimulationParam::default().zero_gravity())
        .unwrap();
    running(&mut manager);

    // Vertex 8 sits at (1, 0, 1); the target is far straight above it.
    let drag = DragInfo::new(0, 8, Point3::new(1.0, 10.0, 1.0));
    manager.simulation_update(Some(&drag)).unwrap();

    let out_iter = f64::from(manager.simulation_param().out_iter);
    let dragged = manager.positions()[8];
    assert_relative_eq!(dragged.y, 0.1 * out_iter, epsilon = 1e-9);
    assert_relative_eq!(dragged.x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(dragged.z, 1.0, epsilon = 1e-9);
}

#[test]
fn drag_reaches_nearby_target() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 2));
    manager
        .set_simulation_param(SimulationParam::default().zero_gravity())
        .unwrap();
    running(&mut manager);

    let target = Point3::new(1.0, 0.05, 1.0);
    manager
        .simulation_update(Some(&DragInfo::new(0, 8, target)))
        .unwrap();

    assert_relative_eq!(manager.positions()[8], target, epsilon = 1e-9);
}

#[test]
fn cloth_drapes_over_sphere() {
    let body = BodyField::sphere(Point3::new(0.5, 0.0, 0.5), 0.3, 32, 0.2).unwrap();
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.4, 8));
    manager.set_body_field(body.clone());
    running(&mut manager);

    let mut contacts = 0;
    for _ in 0..12 {
        contacts += manager.simulation_update(None).unwrap().body_contacts;
    }
    assert!(contacts > 0);

    let cell = body.layout().cell_size;
    for p in manager.positions() {
        if let Some(d) = body.distance(*p) {
            assert!(d > -cell, "vertex {p:?} is {d} inside the body");
        }
    }

    // Center vertex rests on top of the sphere.
    let center = manager.positions()[40];
    assert!(center.y > 0.2, "center fell through: {center:?}");
}

#[test]
fn state_transitions() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 2));

    assert!(matches!(
        manager.set_simulation_mode(SimulationMode::Running),
        Err(ClothError::InvalidTransition { .. })
    ));

    manager.simulation_init().unwrap();
    assert_eq!(manager.simulation_mode(), SimulationMode::Paused);

    // Paused frames do not move anything.
    let before = manager.positions().to_vec();
    manager.simulation_update(None).unwrap();
    assert_eq!(manager.positions(), before.as_slice());

    manager.set_simulation_mode(SimulationMode::Running).unwrap();
    manager.simulation_update(None).unwrap();
    assert_ne!(manager.positions(), before.as_slice());

    manager.set_simulation_mode(SimulationMode::Paused).unwrap();
    let paused = manager.positions().to_vec();
    manager.simulation_update(None).unwrap();
    assert_eq!(manager.positions(), paused.as_slice());

    manager.simulation_destroy();
    assert_eq!(manager.simulation_mode(), SimulationMode::NotInitialized);
    assert!(manager.positions().is_empty());
}

#[test]
fn resource_limit_failure_leaves_not_initialized() {
    let mut manager = ClothManager::with_limits(DeviceLimits::with_max_elements(4));
    manager.add_cloth_piece(sheet(0.0, 2));

    let err = manager.simulation_init().unwrap_err();
    assert!(err.is_resource(), "unexpected error: {err}");
    assert_eq!(manager.simulation_mode(), SimulationMode::NotInitialized);
    assert!(manager.solver().is_none());
    assert!(manager.merged().x.is_empty());
}

#[test]
fn init_is_repeatable() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 3));
    manager.add_cloth_piece(sheet(1.0, 2));

    manager.simulation_init().unwrap();
    let topology = manager.topology().clone();
    let merged = manager.merged().clone();

    manager.simulation_init().unwrap();
    assert_eq!(manager.topology(), &topology);
    assert_eq!(manager.merged(), &merged);
    assert_eq!(manager.simulation_mode(), SimulationMode::Paused);
}

#[test]
fn non_manifold_piece_fails_init() {
    let vertices = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.5, 1.0, 0.0),
        Point3::new(0.5, -1.0, 0.0),
        Point3::new(0.5, 0.0, 1.0),
    ];
    let triangles = vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]];
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(ClothPiece::new("fin", vertices, triangles));

    let err = manager.simulation_init().unwrap_err();
    assert!(matches!(
        err,
        ClothError::NonManifoldEdge {
            v0: 0,
            v1: 1,
            faces: 3
        }
    ));
    assert!(err.is_topology());
    assert_eq!(manager.simulation_mode(), SimulationMode::NotInitialized);
}

#[test]
fn pieces_keep_their_own_vertices() {
    let mut manager = ClothManager::new();
    manager.add_cloth_piece(sheet(0.0, 2));
    manager.add_cloth_piece(sheet(2.0, 2));
    running(&mut manager);

    manager.simulation_update(None).unwrap();

    let first = manager.cloth_piece(0).unwrap();
    let second = manager.cloth_piece(1).unwrap();
    assert_eq!(first.vertices(), &manager.positions()[..9]);
    assert_eq!(second.vertices(), &manager.positions()[9..]);
    assert!(second.bounding_box().0.y > first.bounding_box().1.y);
}
