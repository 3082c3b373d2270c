//! Cloth simulation with a Chebyshev-accelerated Jacobi solver.
//!
//! This crate simulates one or more triangle-mesh cloth pieces against a
//! static body given as a signed distance field:
//!
//! - **Springs** along every mesh edge, solved as a local/global step
//! - **Quadratic bending** from a cotangent stencil on each interior edge
//! - **Body contact** by projecting vertices out of the distance field
//! - **Pinning and dragging** of individual vertices
//!
//! # Pipeline
//!
//! ```text
//! ClothPiece, ClothPiece, ...           BodyField
//!        |                                  |
//!   MergedMesh (global vertex/triangle arrays)
//!        |                                  |
//!   Topology (one-ring CSR, springs, bending coefficients)
//!        |                                  |
//!   DeviceBuffers  <------------------------+
//!        |
//!   ClothSolver::step  (out_iter outer steps per frame)
//!        |
//!   positions published back to every ClothPiece
//! ```
//!
//! ## Outer Step
//!
//! ```text
//!   1. Smooth velocities over the one-ring, damp, add gravity
//!   2. Provisional step x += v*dt, lock pinned and dragged vertices
//!   3. inner_iter damped-Jacobi sweeps with Chebyshev weights
//!   4. Body collision, then v = (x - x_old) / dt capped at velocity_cap
//! ```
//!
//! Every per-vertex pass runs as independent lanes. With the `parallel`
//! feature (on by default) lanes run on the rayon thread pool.
//!
//! # Quick Start
//!
//! ```
//! use sim_cloth::{ClothManager, ClothPiece, SimulationMode};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut manager = ClothManager::new();
//! let sheet = ClothPiece::grid(
//!     "sheet",
//!     Point3::new(0.0, 1.0, 0.0),
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(0.0, 0.0, 1.0),
//!     8,
//!     8,
//! );
//! let corners = sheet.corner_vertices().unwrap_or_default();
//! let piece = manager.add_cloth_piece(sheet);
//!
//! manager.simulation_init()?;
//! manager.set_vertex_fixed(piece, corners[0], 1.0)?;
//! manager.set_vertex_fixed(piece, corners[1], 1.0)?;
//! manager.set_simulation_mode(SimulationMode::Running)?;
//!
//! for _ in 0..4 {
//!     manager.simulation_update(None)?;
//! }
//! let pinned = manager.positions()[corners[0]];
//! assert!((pinned.y - 1.0).abs() < 1e-12);
//! assert!(manager.positions()[40].y < 1.0);
//! # Ok::<(), sim_cloth::ClothError>(())
//! ```
//!
//! # Features
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `parallel` | yes | rayon lanes |
//! | `self-collision` | no | vertex/triangle proximity pass |
//! | `serde` | no | serialize parameters and body fields |
//!
//! # Layer 0 Crate
//!
//! This crate has no Bevy or GPU dependencies. The device buffers are host
//! arrays with the same layout and lifecycle a GPU backend would use.

#![doc(html_root_url = "https://docs.rs/sim-cloth/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
// Allow precision loss when converting counts to f64
#![allow(clippy::cast_precision_loss)]
// Grid cells and dimensions are non-negative and far below the target range
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
#![allow(clippy::too_many_lines)]
// Allow pass by value for small Copy types
#![allow(clippy::needless_pass_by_value)]
#![cfg_attr(test, allow(clippy::uninlined_format_args, clippy::float_cmp))]

pub mod aggregate;
pub mod body;
#[cfg(feature = "self-collision")]
pub mod collision;
pub mod device;
pub mod error;
pub mod kernels;
pub mod manager;
pub mod param;
pub mod piece;
pub mod solver;
pub mod topology;

pub use aggregate::MergedMesh;
pub use body::{BodyField, FieldLayout};
pub use device::{
    DeviceArray, DeviceBuffers, DeviceLimits, DiagnosticHook, DumpArray, PositionSlots,
    TextDumpHook,
};
pub use error::{ClothError, Result};
pub use manager::ClothManager;
pub use param::{SimulationMode, SimulationParam};
pub use piece::{ClothPiece, ClothSurface, DragInfo};
pub use solver::{ClothSolver, SolverStats};
pub use topology::{EdgeQuad, Topology};

// Re-export nalgebra types used in the public API
pub use nalgebra::{Point3, Vector3};
