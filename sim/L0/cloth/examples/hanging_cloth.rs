//! Hanging Cloth over a Sphere
//!
//! A square sheet pinned at two corners swings down and drapes over a sphere.
//! Every few frames the example prints the sheet's bounding box and the solver
//! statistics.
//!
//! Set `RUST_LOG=sim_cloth=debug` to see per-frame solver logs, and pass a
//! directory as the first argument to dump the device arrays after init.
//!
//! Run with: `cargo run -p sim-cloth --example hanging_cloth --release`

use nalgebra::{Point3, Vector3};
use sim_cloth::{
    BodyField, ClothError, ClothManager, ClothPiece, SimulationMode, SimulationParam,
    TextDumpHook,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Scene Constants
// ============================================================================

/// Side length of the sheet in meters.
const SHEET_SIZE: f64 = 1.2;
/// Grid segments along each side.
const SEGMENTS: usize = 24;
/// Sphere radius in meters.
const SPHERE_RADIUS: f64 = 0.3;
/// Frames to simulate.
const FRAMES: usize = 240;

fn main() -> Result<(), ClothError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sim_cloth=info")),
        )
        .init();

    let sheet = ClothPiece::grid(
        "sheet",
        Point3::new(-SHEET_SIZE / 2.0, 0.5, -SHEET_SIZE / 2.0),
        Vector3::new(SHEET_SIZE, 0.0, 0.0),
        Vector3::new(0.0, 0.0, SHEET_SIZE),
        SEGMENTS,
        SEGMENTS,
    );
    let corners = sheet.corner_vertices().unwrap_or_default();

    let mut manager = ClothManager::new();
    let piece = manager.add_cloth_piece(sheet);
    manager.set_body_field(BodyField::sphere(
        Point3::origin(),
        SPHERE_RADIUS,
        48,
        0.1,
    )?);
    manager.set_simulation_param(SimulationParam::interactive())?;

    if let Some(dir) = std::env::args().nth(1) {
        std::fs::create_dir_all(&dir)?;
        manager.set_diagnostic_hook(Box::new(TextDumpHook::new(dir)));
    }

    manager.simulation_init()?;
    manager.set_vertex_fixed(piece, corners[0], 1.0)?;
    manager.set_vertex_fixed(piece, corners[1], 1.0)?;
    manager.set_simulation_mode(SimulationMode::Running)?;

    for frame in 0..FRAMES {
        let stats = manager.simulation_update(None)?;
        if frame % 30 == 0 {
            if let Some(sheet) = manager.cloth_piece(piece) {
                let (min, max) = sheet.bounding_box();
                println!(
                    "frame {frame:4}: y in [{:.3}, {:.3}], contacts {:4}, max speed {:.3}",
                    min.y, max.y, stats.body_contacts, stats.max_speed
                );
            }
        }
    }

    manager.simulation_destroy();
    Ok(())
}
