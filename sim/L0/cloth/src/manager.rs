//! Simulation controller.
//!
//! [`ClothManager`] owns the cloth pieces, the body field, the parameters and
//! the solver, and moves between three modes:
//!
//! ```text
//! NotInitialized --simulation_init--> Paused <--set_simulation_mode--> Running
//!        ^                              |                                 |
//!        +-------simulation_destroy-----+---------------------------------+
//! ```
//!
//! Only `Running` advances frames. Pausing or destroying takes effect at the
//! next frame boundary.

use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::aggregate::MergedMesh;
use crate::body::BodyField;
use crate::device::{DeviceLimits, DiagnosticHook};
use crate::error::{ClothError, Result};
use crate::param::{SimulationMode, SimulationParam};
use crate::piece::{ClothPiece, ClothSurface, DragInfo};
use crate::solver::{ClothSolver, SolverStats};
use crate::topology::Topology;

/// Owns every piece of cloth simulation state.
pub struct ClothManager<P: ClothSurface = ClothPiece> {
    pieces: Vec<P>,
    body: BodyField,
    param: SimulationParam,
    mode: SimulationMode,
    limits: DeviceLimits,
    merged: MergedMesh,
    topology: Topology,
    solver: Option<ClothSolver>,
    fixed_dirty: bool,
    hook: Option<Box<dyn DiagnosticHook>>,
}

impl<P: ClothSurface> std::fmt::Debug for ClothManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClothManager")
            .field("pieces", &self.pieces.len())
            .field("mode", &self.mode)
            .field("param", &self.param)
            .field("vertices", &self.merged.num_vertices())
            .field("has_hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: ClothSurface> Default for ClothManager<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ClothSurface> ClothManager<P> {
    /// Create an empty manager with default parameters and limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Create an empty manager with custom device limits.
    #[must_use]
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            pieces: Vec::new(),
            body: BodyField::empty(),
            param: SimulationParam::default(),
            mode: SimulationMode::NotInitialized,
            limits,
            merged: MergedMesh::default(),
            topology: Topology::default(),
            solver: None,
            fixed_dirty: false,
            hook: None,
        }
    }

    /// Add a cloth piece and return its index.
    ///
    /// Tears down a live simulation; call
    /// [`simulation_init`](Self::simulation_init) again afterwards.
    pub fn add_cloth_piece(&mut self, piece: P) -> usize {
        if self.mode.is_initialized() {
            info!("cloth piece added, tearing down simulation");
            self.simulation_destroy();
        }
        self.pieces.push(piece);
        self.pieces.len() - 1
    }

    /// Number of cloth pieces.
    #[must_use]
    pub fn num_cloth_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// A cloth piece by index.
    #[must_use]
    pub fn cloth_piece(&self, index: usize) -> Option<&P> {
        self.pieces.get(index)
    }

    /// A mutable cloth piece by index.
    ///
    /// Vertex edits made here are overwritten by the next frame of a live
    /// simulation.
    pub fn cloth_piece_mut(&mut self, index: usize) -> Option<&mut P> {
        self.pieces.get_mut(index)
    }

    /// All cloth pieces.
    #[must_use]
    pub fn cloth_pieces(&self) -> &[P] {
        &self.pieces
    }

    /// Replace the body distance field. Takes effect at the next init.
    pub fn set_body_field(&mut self, body: BodyField) {
        self.body = body;
    }

    /// Body distance field.
    #[must_use]
    pub const fn body_field(&self) -> &BodyField {
        &self.body
    }

    /// Current parameters.
    #[must_use]
    pub const fn simulation_param(&self) -> &SimulationParam {
        &self.param
    }

    /// Replace the parameters.
    ///
    /// Stiffness values apply at the next init; everything else at the next
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidParam`] and keeps the old parameters if
    /// validation fails.
    pub fn set_simulation_param(&mut self, param: SimulationParam) -> Result<()> {
        param.validate()?;
        self.param = param;
        Ok(())
    }

    /// Current mode.
    #[must_use]
    pub const fn simulation_mode(&self) -> SimulationMode {
        self.mode
    }

    /// Change mode.
    ///
    /// `Paused <-> Running` toggles; `NotInitialized` destroys.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidTransition`] when asking for `Paused` or
    /// `Running` before [`simulation_init`](Self::simulation_init).
    pub fn set_simulation_mode(&mut self, mode: SimulationMode) -> Result<()> {
        match (self.mode, mode) {
            (_, SimulationMode::NotInitialized) => {
                self.simulation_destroy();
                Ok(())
            }
            (SimulationMode::NotInitialized, to) => Err(ClothError::InvalidTransition {
                from: SimulationMode::NotInitialized,
                to,
            }),
            (from, to) => {
                if from != to {
                    debug!(?from, ?to, "simulation mode");
                }
                self.mode = to;
                Ok(())
            }
        }
    }

    /// Install a hook that receives every device array after init.
    pub fn set_diagnostic_hook(&mut self, hook: Box<dyn DiagnosticHook>) {
        self.hook = Some(hook);
    }

    /// Remove the diagnostic hook.
    pub fn clear_diagnostic_hook(&mut self) -> Option<Box<dyn DiagnosticHook>> {
        self.hook.take()
    }

    /// Build topology, allocate and upload device buffers, enter `Paused`.
    ///
    /// Any previous simulation is torn down first. On failure nothing stays
    /// allocated and the mode is `NotInitialized`.
    ///
    /// # Errors
    ///
    /// Topology errors ([`ClothError::NonManifoldEdge`],
    /// [`ClothError::InvalidTopology`], [`ClothError::NeighborNotFound`]),
    /// resource errors ([`ClothError::BufferTooLarge`],
    /// [`ClothError::Allocation`], [`ClothError::TransferSizeMismatch`]) and
    /// hook I/O errors.
    pub fn simulation_init(&mut self) -> Result<()> {
        self.simulation_destroy();

        let merged = MergedMesh::from_pieces(&self.pieces);
        let topology = Topology::build(
            &merged.x,
            &merged.t,
            self.param.spring_k,
            self.param.bending_k,
        )?;
        let mut solver = ClothSolver::new(&merged, &topology, &self.body, &self.limits)?;

        if let Some(hook) = self.hook.as_deref_mut() {
            if let Err(e) = solver.buffers().dump(hook) {
                solver.release();
                return Err(e);
            }
        }

        info!(
            pieces = merged.num_pieces(),
            vertices = merged.num_vertices(),
            triangles = merged.num_triangles(),
            slots = topology.num_slots(),
            bending_edges = topology.num_bending_edges(),
            field = self.body.size_xyz(),
            "cloth simulation initialized"
        );

        self.merged = merged;
        self.topology = topology;
        self.solver = Some(solver);
        self.fixed_dirty = false;
        self.mode = SimulationMode::Paused;
        Ok(())
    }

    /// Release device buffers and return to `NotInitialized`.
    pub fn simulation_destroy(&mut self) {
        if let Some(mut solver) = self.solver.take() {
            solver.release();
            info!("cloth simulation destroyed");
        }
        self.merged = MergedMesh::default();
        self.topology = Topology::default();
        self.fixed_dirty = false;
        self.mode = SimulationMode::NotInitialized;
    }

    /// Destroy the simulation and drop every piece and the body field.
    pub fn clear(&mut self) {
        self.simulation_destroy();
        self.pieces.clear();
        self.body = BodyField::empty();
    }

    /// Pin or release a vertex. `weight > 0` pins.
    ///
    /// The mask is synced to the device at the start of the next frame and
    /// reset by [`simulation_init`](Self::simulation_init).
    ///
    /// # Errors
    ///
    /// - [`ClothError::NotInitialized`] before init
    /// - [`ClothError::IndexOutOfBounds`] for a bad piece or vertex
    /// - [`ClothError::InvalidParam`] for a negative or non-finite weight
    pub fn set_vertex_fixed(&mut self, piece: usize, vertex: usize, weight: f64) -> Result<()> {
        if !self.mode.is_initialized() {
            return Err(ClothError::NotInitialized);
        }
        if !(weight >= 0.0 && weight.is_finite()) {
            return Err(ClothError::invalid_param(format!(
                "fixed weight must be non-negative, got {weight}"
            )));
        }
        let global = self.merged.global_index(piece, vertex).ok_or_else(|| {
            ClothError::index_out_of_bounds(format!("vertex {vertex} of piece {piece}"))
        })?;
        self.merged.fixed[global] = weight;
        self.fixed_dirty = true;
        Ok(())
    }

    /// Advance one frame if `Running`; otherwise return empty stats.
    ///
    /// After the frame every piece's vertices are overwritten from the solver
    /// and its normals and bounding box recomputed.
    ///
    /// # Errors
    ///
    /// Transfer errors between host and device.
    pub fn simulation_update(&mut self, drag: Option<&DragInfo>) -> Result<SolverStats> {
        if self.mode != SimulationMode::Running {
            return Ok(SolverStats::default());
        }
        let Some(solver) = self.solver.as_mut() else {
            return Err(ClothError::NotInitialized);
        };

        if self.fixed_dirty {
            solver.upload_fixed(&self.merged.fixed)?;
            self.fixed_dirty = false;
        }

        let drag = drag.and_then(|d| match self.merged.global_index(d.piece, d.vertex) {
            Some(global) => Some((global, d.target)),
            None => {
                debug!(piece = d.piece, vertex = d.vertex, "ignoring drag outside the mesh");
                None
            }
        });

        let stats = solver.step(&self.param, drag);
        solver.download(&mut self.merged.x, &mut self.merged.v)?;

        for (i, piece) in self.pieces.iter_mut().enumerate() {
            let Some(range) = self.merged.piece_range(i) else {
                continue;
            };
            piece.set_vertices(&self.merged.x[range]);
            piece.update_normals();
            piece.update_bounding_box();
        }

        Ok(stats)
    }

    /// Built topology; empty before init.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Merged mesh as of the last frame; empty before init.
    #[must_use]
    pub const fn merged(&self) -> &MergedMesh {
        &self.merged
    }

    /// Global vertex positions as of the last frame.
    #[must_use]
    pub fn positions(&self) -> &[Point3<f64>] {
        &self.merged.x
    }

    /// Global vertex velocities as of the last frame.
    #[must_use]
    pub fn velocities(&self) -> &[Vector3<f64>] {
        &self.merged.v
    }

    /// Device limits used at init.
    #[must_use]
    pub const fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Solver, when initialized.
    #[must_use]
    pub fn solver(&self) -> Option<&ClothSolver> {
        self.solver.as_ref()
    }
}

impl<P: ClothSurface> Drop for ClothManager<P> {
    fn drop(&mut self) {
        self.simulation_destroy();
    }
}
