//! Signed distance field of the rigid body the cloth rests on.
//!
//! The field is a dense grid sampled at `origin + (x, y, z) * cell_size`.
//! Values are negative inside the body and stored in ZYX order (Z varies
//! slowest, X fastest):
//!
//! ```text
//! values[z * nx * ny + y * nx + x]
//! ```
//!
//! Sampling is split from ownership: [`FieldLayout`] plus a value slice is
//! enough to query the field, so the device mirror can be sampled without a
//! [`BodyField`].

// Grid indices are small and bounds-checked before casting.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ClothError, Result};

/// Grid geometry of a distance field.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldLayout {
    /// Samples along X, Y, Z.
    pub dims: [usize; 3],
    /// Uniform spacing between samples.
    pub cell_size: f64,
    /// Position of sample `(0, 0, 0)`.
    pub origin: Point3<f64>,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self {
            dims: [0; 3],
            cell_size: 1.0,
            origin: Point3::origin(),
        }
    }
}

impl FieldLayout {
    /// Total number of samples.
    #[must_use]
    pub const fn size_xyz(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Whether the grid holds no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size_xyz() == 0
    }

    /// Flat index of sample `(x, y, z)`.
    #[must_use]
    pub const fn index(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.dims[0] * self.dims[1] + y * self.dims[0] + x
    }

    /// Grid extent along each axis.
    #[must_use]
    pub fn extent(&self) -> Vector3<f64> {
        Vector3::new(
            self.dims[0].saturating_sub(1) as f64,
            self.dims[1].saturating_sub(1) as f64,
            self.dims[2].saturating_sub(1) as f64,
        ) * self.cell_size
    }

    /// Whether `p` lies inside the sampled region.
    #[must_use]
    pub fn contains(&self, p: Point3<f64>) -> bool {
        if self.is_empty() {
            return false;
        }
        let g = (p - self.origin) / self.cell_size;
        let ext = self.extent() / self.cell_size;
        (0..3).all(|a| g[a] >= 0.0 && g[a] <= ext[a])
    }

    /// Clamp `p` into the sampled region.
    #[must_use]
    pub fn clamp(&self, p: Point3<f64>) -> Point3<f64> {
        let max = self.origin + self.extent();
        p.sup(&self.origin).inf(&max)
    }
}

/// Trilinearly interpolated distance at `p`, `None` outside the grid.
#[must_use]
#[allow(clippy::similar_names)]
pub fn sample_distance(values: &[f64], layout: &FieldLayout, p: Point3<f64>) -> Option<f64> {
    if !layout.contains(p) || values.len() != layout.size_xyz() {
        return None;
    }

    let [nx, ny, nz] = layout.dims;
    let g = (p - layout.origin) / layout.cell_size;

    let x0 = (g.x.floor() as usize).min(nx - 1);
    let y0 = (g.y.floor() as usize).min(ny - 1);
    let z0 = (g.z.floor() as usize).min(nz - 1);
    let x1 = (x0 + 1).min(nx - 1);
    let y1 = (y0 + 1).min(ny - 1);
    let z1 = (z0 + 1).min(nz - 1);

    let fx = g.x - x0 as f64;
    let fy = g.y - y0 as f64;
    let fz = g.z - z0 as f64;

    let v = |x, y, z| values[layout.index(x, y, z)];

    let v00 = v(x0, y0, z0) + fx * (v(x1, y0, z0) - v(x0, y0, z0));
    let v10 = v(x0, y1, z0) + fx * (v(x1, y1, z0) - v(x0, y1, z0));
    let v01 = v(x0, y0, z1) + fx * (v(x1, y0, z1) - v(x0, y0, z1));
    let v11 = v(x0, y1, z1) + fx * (v(x1, y1, z1) - v(x0, y1, z1));

    let v0 = v00 + fy * (v10 - v00);
    let v1 = v01 + fy * (v11 - v01);

    Some(v0 + fz * (v1 - v0))
}

/// Normalized forward-difference gradient at `p`.
///
/// Returns `None` outside the grid or where the field is flat.
#[must_use]
pub fn sample_gradient(
    values: &[f64],
    layout: &FieldLayout,
    p: Point3<f64>,
) -> Option<Vector3<f64>> {
    let eps = layout.cell_size * 0.5;
    let d = sample_distance(values, layout, p)?;

    let mut grad = Vector3::zeros();
    for axis in 0..3 {
        let mut q = p;
        q[axis] += eps;
        let q = layout.clamp(q);
        let h = q[axis] - p[axis];
        // At the upper face, difference backward instead.
        grad[axis] = if h > 0.0 {
            (sample_distance(values, layout, q)? - d) / h
        } else {
            let mut r = p;
            r[axis] -= eps;
            let r = layout.clamp(r);
            let h = p[axis] - r[axis];
            if h > 0.0 {
                (d - sample_distance(values, layout, r)?) / h
            } else {
                0.0
            }
        };
    }

    let norm = grad.norm();
    (norm > 1e-10).then(|| grad / norm)
}

/// A rigid body's signed distance grid.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyField {
    values: Vec<f64>,
    layout: FieldLayout,
}

impl BodyField {
    /// Create a field from samples in ZYX order.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidBodyField`] if a dimension is zero, the
    /// cell size is not positive, or `values.len() != nx * ny * nz`.
    pub fn new(
        values: Vec<f64>,
        dims: [usize; 3],
        cell_size: f64,
        origin: Point3<f64>,
    ) -> Result<Self> {
        if dims.contains(&0) {
            return Err(ClothError::invalid_body_field(format!(
                "dimensions must be positive, got {dims:?}"
            )));
        }
        if !(cell_size > 0.0 && cell_size.is_finite()) {
            return Err(ClothError::invalid_body_field(format!(
                "cell_size must be positive, got {cell_size}"
            )));
        }
        let layout = FieldLayout {
            dims,
            cell_size,
            origin,
        };
        if values.len() != layout.size_xyz() {
            return Err(ClothError::invalid_body_field(format!(
                "{} values for a {}x{}x{} grid",
                values.len(),
                dims[0],
                dims[1],
                dims[2]
            )));
        }
        Ok(Self { values, layout })
    }

    /// A field with no samples; every query misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sample a signed distance function on a grid.
    ///
    /// # Errors
    ///
    /// Same as [`BodyField::new`].
    pub fn from_fn<F>(dims: [usize; 3], cell_size: f64, origin: Point3<f64>, f: F) -> Result<Self>
    where
        F: Fn(Point3<f64>) -> f64,
    {
        let [nx, ny, nz] = dims;
        let mut values = Vec::with_capacity(nx * ny * nz);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let offset = Vector3::new(x as f64, y as f64, z as f64) * cell_size;
                    values.push(f(origin + offset));
                }
            }
        }
        Self::new(values, dims, cell_size, origin)
    }

    /// A sphere of `radius` around `center`, padded by `padding` on every side.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidBodyField`] if `resolution < 2`.
    pub fn sphere(
        center: Point3<f64>,
        radius: f64,
        resolution: usize,
        padding: f64,
    ) -> Result<Self> {
        let extent = radius + padding;
        let (cell_size, origin) = cube_grid(center, extent, resolution)?;
        Self::from_fn([resolution; 3], cell_size, origin, |p| {
            (p - center).norm() - radius
        })
    }

    /// An axis-aligned box, padded by `padding` on every side.
    ///
    /// # Errors
    ///
    /// Returns [`ClothError::InvalidBodyField`] if `resolution < 2`.
    pub fn box_shape(
        center: Point3<f64>,
        half_extents: Vector3<f64>,
        resolution: usize,
        padding: f64,
    ) -> Result<Self> {
        let extent = half_extents.max() + padding;
        let (cell_size, origin) = cube_grid(center, extent, resolution)?;
        Self::from_fn([resolution; 3], cell_size, origin, |p| {
            let q = (p - center).abs() - half_extents;
            let outside = q.sup(&Vector3::zeros()).norm();
            let inside = q.max().min(0.0);
            outside + inside
        })
    }

    /// Number of samples.
    #[must_use]
    pub const fn size_xyz(&self) -> usize {
        self.layout.size_xyz()
    }

    /// Whether the field holds no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Raw samples in ZYX order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Grid geometry.
    #[must_use]
    pub const fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    /// Interpolated signed distance, `None` outside the grid.
    #[must_use]
    pub fn distance(&self, p: Point3<f64>) -> Option<f64> {
        sample_distance(&self.values, &self.layout, p)
    }

    /// Outward unit normal, `None` outside the grid or where the field is flat.
    #[must_use]
    pub fn gradient(&self, p: Point3<f64>) -> Option<Vector3<f64>> {
        sample_gradient(&self.values, &self.layout, p)
    }

    /// Sampled region as `(min, max)`.
    #[must_use]
    pub fn aabb(&self) -> (Point3<f64>, Point3<f64>) {
        (self.layout.origin, self.layout.origin + self.layout.extent())
    }
}

fn cube_grid(center: Point3<f64>, extent: f64, resolution: usize) -> Result<(f64, Point3<f64>)> {
    if resolution < 2 {
        return Err(ClothError::invalid_body_field(format!(
            "resolution must be at least 2, got {resolution}"
        )));
    }
    let cell_size = 2.0 * extent / (resolution - 1) as f64;
    Ok((cell_size, center - Vector3::repeat(extent)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_sphere() -> BodyField {
        BodyField::sphere(Point3::origin(), 1.0, 33, 0.5).unwrap()
    }

    #[test]
    fn test_sphere_distance() {
        let field = unit_sphere();
        assert_relative_eq!(
            field.distance(Point3::origin()).unwrap(),
            -1.0,
            epsilon = 0.05
        );
        assert_relative_eq!(
            field.distance(Point3::new(1.2, 0.0, 0.0)).unwrap(),
            0.2,
            epsilon = 0.05
        );
    }

    #[test]
    fn test_outside_grid_is_none() {
        let field = unit_sphere();
        assert!(field.distance(Point3::new(5.0, 0.0, 0.0)).is_none());
        assert!(field.gradient(Point3::new(5.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_gradient_points_outward() {
        let field = unit_sphere();
        let g = field.gradient(Point3::new(0.0, 0.8, 0.0)).unwrap();
        assert_relative_eq!(g.norm(), 1.0, epsilon = 1e-9);
        assert!(g.y > 0.9);
    }

    #[test]
    fn test_gradient_on_upper_face() {
        let field = unit_sphere();
        let (_, max) = field.aabb();
        let g = field.gradient(Point3::new(max.x, 0.0, 0.0)).unwrap();
        assert!(g.x > 0.9);
    }

    #[test]
    fn test_box_shape() {
        let field =
            BodyField::box_shape(Point3::origin(), Vector3::new(1.0, 0.5, 0.5), 21, 0.5).unwrap();
        assert!(field.distance(Point3::origin()).unwrap() < 0.0);
        assert!(field.distance(Point3::new(0.0, 0.9, 0.0)).unwrap() > 0.0);
    }

    #[test]
    fn test_layout_indexing() {
        let field = BodyField::from_fn([2, 3, 4], 1.0, Point3::origin(), |p| {
            p.x + 10.0 * p.y + 100.0 * p.z
        })
        .unwrap();
        assert_eq!(field.size_xyz(), 24);
        let idx = field.layout().index(1, 2, 3);
        assert_relative_eq!(field.values()[idx], 321.0);
        assert_relative_eq!(
            field.distance(Point3::new(0.5, 1.5, 2.5)).unwrap(),
            265.5,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_invalid_construction() {
        assert!(BodyField::new(vec![0.0; 7], [2, 2, 2], 1.0, Point3::origin()).is_err());
        assert!(BodyField::new(vec![], [0, 2, 2], 1.0, Point3::origin()).is_err());
        assert!(BodyField::new(vec![0.0; 8], [2, 2, 2], 0.0, Point3::origin()).is_err());
        assert!(BodyField::sphere(Point3::origin(), 1.0, 1, 0.0).is_err());
    }

    #[test]
    fn test_empty_field_misses() {
        let field = BodyField::empty();
        assert!(field.is_empty());
        assert!(field.distance(Point3::origin()).is_none());
    }
}
