//! Device-resident mirrors of the solver state.
//!
//! The solver runs on a flat structure-of-arrays layout: every per-vertex,
//! per-slot and per-sample array has a device counterpart of identical
//! length, plus scratch arrays the kernels write into. All of them are
//! allocated together by [`DeviceBuffers::allocate`], filled by one bulk
//! [`DeviceBuffers::upload`], and freed by [`DeviceBuffers::release`].
//!
//! # Position slots
//!
//! The Jacobi/Chebyshev sweep reads the current and previous iterate and
//! writes the next one. The three iterates live in [`PositionSlots`] and are
//! selected by a cursor, so advancing an iteration is a rotation:
//!
//! ```text
//! cursor k:   current = k   next = k+1   previous = k+2   (mod 3)
//! rotate():   current <- next, previous <- current, next <- previous
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::aggregate::MergedMesh;
use crate::body::{BodyField, FieldLayout};
use crate::error::{ClothError, Result};
use crate::topology::Topology;

/// Resource limits for device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum element count of any single buffer.
    pub max_elements: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_elements: 1 << 28,
        }
    }
}

impl DeviceLimits {
    /// Limits with a custom per-buffer element cap.
    #[must_use]
    pub const fn with_max_elements(max_elements: usize) -> Self {
        Self { max_elements }
    }
}

/// One device buffer.
#[derive(Debug, Clone)]
pub struct DeviceArray<T> {
    label: &'static str,
    data: Vec<T>,
}

impl<T: Clone> DeviceArray<T> {
    /// Allocate `len` elements initialized to `zero`.
    ///
    /// # Errors
    ///
    /// - [`ClothError::BufferTooLarge`] if `len` exceeds `limits.max_elements`
    /// - [`ClothError::Allocation`] if memory cannot be reserved
    pub fn allocate(
        label: &'static str,
        len: usize,
        zero: T,
        limits: &DeviceLimits,
    ) -> Result<Self> {
        if len > limits.max_elements {
            return Err(ClothError::BufferTooLarge {
                label,
                requested: len,
                limit: limits.max_elements,
            });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ClothError::Allocation {
                label,
                requested: len,
            })?;
        data.resize(len, zero);
        Ok(Self { label, data })
    }

    /// Copy a host array into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::TransferSizeMismatch`] if lengths differ.
    pub fn upload(&mut self, host: &[T]) -> Result<()> {
        self.check_len(host.len())?;
        self.data.clone_from_slice(host);
        Ok(())
    }

    /// Copy the buffer into a host array.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::TransferSizeMismatch`] if lengths differ.
    pub fn download(&self, host: &mut [T]) -> Result<()> {
        self.check_len(host.len())?;
        host.clone_from_slice(&self.data);
        Ok(())
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        if actual == self.data.len() {
            Ok(())
        } else {
            Err(ClothError::TransferSizeMismatch {
                label: self.label,
                expected: self.data.len(),
                actual,
            })
        }
    }
}

impl<T> DeviceArray<T> {
    /// Buffer label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Device contents.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable device contents.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn free(&mut self) {
        self.data = Vec::new();
    }
}

/// The three rotating position iterates.
#[derive(Debug, Clone)]
pub struct PositionSlots {
    slots: [DeviceArray<Point3<f64>>; 3],
    cursor: usize,
}

impl PositionSlots {
    fn allocate(len: usize, limits: &DeviceLimits) -> Result<Self> {
        let zero = Point3::origin();
        Ok(Self {
            slots: [
                DeviceArray::allocate("x", len, zero, limits)?,
                DeviceArray::allocate("next_x", len, zero, limits)?,
                DeviceArray::allocate("prev_x", len, zero, limits)?,
            ],
            cursor: 0,
        })
    }

    /// Slot index currently holding the live positions.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Live positions.
    #[must_use]
    pub fn current(&self) -> &[Point3<f64>] {
        self.slots[self.cursor].as_slice()
    }

    /// Mutable live positions.
    pub fn current_mut(&mut self) -> &mut [Point3<f64>] {
        self.slots[self.cursor].as_mut_slice()
    }

    /// Previous iterate.
    #[must_use]
    pub fn previous(&self) -> &[Point3<f64>] {
        self.slots[(self.cursor + 2) % 3].as_slice()
    }

    /// Borrow `(current, previous, next)` with only `next` writable.
    pub fn split(&mut self) -> (&[Point3<f64>], &[Point3<f64>], &mut [Point3<f64>]) {
        let [s0, s1, s2] = &mut self.slots;
        let (current, previous, next) = match self.cursor {
            0 => (s0, s2, s1),
            1 => (s1, s0, s2),
            _ => (s2, s1, s0),
        };
        (current.as_slice(), previous.as_slice(), next.as_mut_slice())
    }

    /// Make the next iterate current.
    pub fn rotate(&mut self) {
        self.cursor = (self.cursor + 1) % 3;
    }

    /// Copy the live positions into the previous and next slots.
    pub fn sync_from_current(&mut self) {
        let [s0, s1, s2] = &mut self.slots;
        let (current, others) = match self.cursor {
            0 => (s0, [s1, s2]),
            1 => (s1, [s0, s2]),
            _ => (s2, [s0, s1]),
        };
        for other in others {
            other.as_mut_slice().copy_from_slice(current.as_slice());
        }
    }

    fn upload(&mut self, host: &[Point3<f64>]) -> Result<()> {
        for slot in &mut self.slots {
            slot.upload(host)?;
        }
        self.cursor = 0;
        Ok(())
    }

    fn free(&mut self) {
        for slot in &mut self.slots {
            slot.free();
        }
        self.cursor = 0;
    }
}

/// A named device array handed to a [`DiagnosticHook`].
#[derive(Debug, Clone, Copy)]
pub enum DumpArray<'a> {
    /// One scalar per element.
    Scalars(&'a [f64]),
    /// One index per element.
    Indices(&'a [usize]),
    /// One position per element.
    Points(&'a [Point3<f64>]),
    /// One vector per element.
    Vectors(&'a [Vector3<f64>]),
    /// One triangle per element.
    Triangles(&'a [[usize; 3]]),
}

impl DumpArray<'_> {
    /// Element count.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Scalars(a) => a.len(),
            Self::Indices(a) => a.len(),
            Self::Points(a) => a.len(),
            Self::Vectors(a) => a.len(),
            Self::Triangles(a) => a.len(),
        }
    }

    /// Whether there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_lines(&self, out: &mut impl Write) -> std::io::Result<()> {
        match self {
            Self::Scalars(a) => a.iter().try_for_each(|v| writeln!(out, "{v}")),
            Self::Indices(a) => a.iter().try_for_each(|v| writeln!(out, "{v}")),
            Self::Points(a) => a
                .iter()
                .try_for_each(|p| writeln!(out, "{} {} {}", p.x, p.y, p.z)),
            Self::Vectors(a) => a
                .iter()
                .try_for_each(|v| writeln!(out, "{} {} {}", v.x, v.y, v.z)),
            Self::Triangles(a) => a
                .iter()
                .try_for_each(|t| writeln!(out, "{} {} {}", t[0], t[1], t[2])),
        }
    }
}

/// Receives device arrays for offline inspection.
pub trait DiagnosticHook: Send {
    /// Record one array.
    ///
    /// # Errors
    ///
    /// Implementations report their own I/O failures.
    fn record(&mut self, name: &str, data: DumpArray<'_>) -> Result<()>;
}

/// Writes each array to `<dir>/<name>.txt`, one element per line.
#[derive(Debug, Clone)]
pub struct TextDumpHook {
    dir: PathBuf,
}

impl TextDumpHook {
    /// Dump into `dir`, which must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DiagnosticHook for TextDumpHook {
    fn record(&mut self, name: &str, data: DumpArray<'_>) -> Result<()> {
        let path = self.dir.join(format!("{name}.txt"));
        let mut out = BufWriter::new(File::create(&path)?);
        data.write_lines(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

/// Every device array the solver touches.
#[derive(Debug, Clone)]
pub struct DeviceBuffers {
    /// Rotating position iterates.
    pub positions: PositionSlots,
    /// Positions at the start of the outer step.
    pub old_x: DeviceArray<Point3<f64>>,
    /// Velocities.
    pub v: DeviceArray<Vector3<f64>>,
    /// Host-provided pin mask.
    pub fixed: DeviceArray<f64>,
    /// Pin mask plus the drag vertex.
    pub more_fixed: DeviceArray<f64>,
    /// Velocity Laplacian scratch.
    pub f: DeviceArray<Vector3<f64>>,
    /// Inertial right-hand side.
    pub init_b: DeviceArray<Vector3<f64>>,
    /// Diagonal plus inertia.
    pub new_vc: DeviceArray<f64>,
    /// Triangles.
    pub t: DeviceArray<[usize; 3]>,
    /// One-ring neighbors.
    pub all_vv: DeviceArray<usize>,
    /// One-ring offsets.
    pub all_vv_num: DeviceArray<usize>,
    /// Rest lengths.
    pub all_vl: DeviceArray<f64>,
    /// Off-diagonal coefficients.
    pub all_vw: DeviceArray<f64>,
    /// Diagonal coefficients.
    pub all_vc: DeviceArray<f64>,
    /// Body distance samples.
    pub phi: DeviceArray<f64>,
    /// Body grid geometry.
    pub phi_layout: FieldLayout,
    allocated: bool,
}

impl DeviceBuffers {
    /// Allocate zeroed buffers sized to the current topology.
    ///
    /// A failure drops every buffer allocated so far.
    ///
    /// # Errors
    ///
    /// [`ClothError::BufferTooLarge`] or [`ClothError::Allocation`] naming the
    /// first buffer that could not be created.
    pub fn allocate(
        vertex_count: usize,
        triangle_count: usize,
        neighbor_count: usize,
        field_size: usize,
        limits: &DeviceLimits,
    ) -> Result<Self> {
        let n = vertex_count;
        let zero_v = Vector3::zeros();

        let buffers = Self {
            positions: PositionSlots::allocate(n, limits)?,
            old_x: DeviceArray::allocate("old_x", n, Point3::origin(), limits)?,
            v: DeviceArray::allocate("v", n, zero_v, limits)?,
            fixed: DeviceArray::allocate("fixed", n, 0.0, limits)?,
            more_fixed: DeviceArray::allocate("more_fixed", n, 0.0, limits)?,
            f: DeviceArray::allocate("f", n, zero_v, limits)?,
            init_b: DeviceArray::allocate("init_b", n, zero_v, limits)?,
            new_vc: DeviceArray::allocate("new_vc", n, 0.0, limits)?,
            t: DeviceArray::allocate("t", triangle_count, [0; 3], limits)?,
            all_vv: DeviceArray::allocate("all_vv", neighbor_count, 0, limits)?,
            all_vv_num: DeviceArray::allocate("all_vv_num", n + 1, 0, limits)?,
            all_vl: DeviceArray::allocate("all_vl", neighbor_count, 0.0, limits)?,
            all_vw: DeviceArray::allocate("all_vw", neighbor_count, 0.0, limits)?,
            all_vc: DeviceArray::allocate("all_vc", n, 0.0, limits)?,
            phi: DeviceArray::allocate("phi", field_size, 0.0, limits)?,
            phi_layout: FieldLayout::default(),
            allocated: true,
        };

        debug!(
            vertices = n,
            triangles = triangle_count,
            slots = neighbor_count,
            field = field_size,
            "allocated device buffers"
        );
        Ok(buffers)
    }

    /// Whether buffers are live.
    #[must_use]
    pub const fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Number of vertex lanes.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.v.len()
    }

    /// Copy every host array to the device and zero the scratch arrays.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::TransferSizeMismatch`] for the first array whose
    /// host length differs from its allocation.
    pub fn upload(
        &mut self,
        merged: &MergedMesh,
        topology: &Topology,
        body: &BodyField,
    ) -> Result<()> {
        self.positions.upload(&merged.x)?;
        self.old_x.upload(&merged.x)?;
        self.v.upload(&merged.v)?;
        self.fixed.upload(&merged.fixed)?;
        self.t.upload(&merged.t)?;

        self.all_vv.upload(&topology.all_vv)?;
        self.all_vv_num.upload(&topology.all_vv_num)?;
        self.all_vl.upload(&topology.all_vl)?;
        self.all_vw.upload(&topology.all_vw)?;
        self.all_vc.upload(&topology.all_vc)?;

        self.phi.upload(body.values())?;
        self.phi_layout = *body.layout();

        self.more_fixed.fill(0.0);
        self.f.fill(Vector3::zeros());
        self.init_b.fill(Vector3::zeros());
        self.new_vc.fill(0.0);
        Ok(())
    }

    /// Copy the live positions to the host.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::TransferSizeMismatch`] if `host` has the wrong length.
    pub fn download_positions(&self, host: &mut [Point3<f64>]) -> Result<()> {
        if host.len() != self.num_vertices() {
            return Err(ClothError::TransferSizeMismatch {
                label: "x",
                expected: self.num_vertices(),
                actual: host.len(),
            });
        }
        host.copy_from_slice(self.positions.current());
        Ok(())
    }

    /// Copy the velocities to the host.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::TransferSizeMismatch`] if `host` has the wrong length.
    pub fn download_velocities(&self, host: &mut [Vector3<f64>]) -> Result<()> {
        self.v.download(host)
    }

    /// Free every buffer. Safe to call repeatedly.
    pub fn release(&mut self) {
        if !self.allocated {
            return;
        }
        self.positions.free();
        self.old_x.free();
        self.v.free();
        self.fixed.free();
        self.more_fixed.free();
        self.f.free();
        self.init_b.free();
        self.new_vc.free();
        self.t.free();
        self.all_vv.free();
        self.all_vv_num.free();
        self.all_vl.free();
        self.all_vw.free();
        self.all_vc.free();
        self.phi.free();
        self.phi_layout = FieldLayout::default();
        self.allocated = false;
        debug!("released device buffers");
    }

    /// Hand every array to `hook` by name.
    ///
    /// # Errors
    ///
    /// Propagates the first hook failure.
    pub fn dump(&self, hook: &mut dyn DiagnosticHook) -> Result<()> {
        hook.record("x", DumpArray::Points(self.positions.current()))?;
        hook.record("old_x", DumpArray::Points(self.old_x.as_slice()))?;
        hook.record("prev_x", DumpArray::Points(self.positions.previous()))?;
        hook.record("v", DumpArray::Vectors(self.v.as_slice()))?;
        hook.record("fixed", DumpArray::Scalars(self.fixed.as_slice()))?;
        hook.record("more_fixed", DumpArray::Scalars(self.more_fixed.as_slice()))?;
        hook.record("f", DumpArray::Vectors(self.f.as_slice()))?;
        hook.record("init_b", DumpArray::Vectors(self.init_b.as_slice()))?;
        hook.record("new_vc", DumpArray::Scalars(self.new_vc.as_slice()))?;
        hook.record("t", DumpArray::Triangles(self.t.as_slice()))?;
        hook.record("all_vv", DumpArray::Indices(self.all_vv.as_slice()))?;
        hook.record("all_vv_num", DumpArray::Indices(self.all_vv_num.as_slice()))?;
        hook.record("all_vl", DumpArray::Scalars(self.all_vl.as_slice()))?;
        hook.record("all_vw", DumpArray::Scalars(self.all_vw.as_slice()))?;
        hook.record("all_vc", DumpArray::Scalars(self.all_vc.as_slice()))?;
        hook.record("phi", DumpArray::Scalars(self.phi.as_slice()))?;
        Ok(())
    }
}

impl Drop for DeviceBuffers {
    fn drop(&mut self) {
        self.release();
    }
}
