//! Cloth pieces consumed by the solver.
//!
//! The solver only needs a small capability from a piece: read its vertices
//! and triangles, overwrite its vertices after a frame, and refresh whatever
//! derived surface data the renderer reads (normals, bounding box). That
//! capability is [`ClothSurface`]. [`ClothPiece`] is the stock
//! implementation: an indexed triangle mesh with area-weighted vertex
//! normals.
//!
//! ```text
//!   6───7───8
//!   |\  |\  |
//!   | \ | \ |
//!   3───4───5
//!   |\  |\  |
//!   | \ | \ |
//!   0───1───2
//! ```

use nalgebra::{Point3, Vector3};

/// Surface capability the solver depends on.
pub trait ClothSurface {
    /// Current vertex positions, in piece-local index order.
    fn vertices(&self) -> &[Point3<f64>];

    /// Triangles as piece-local vertex indices.
    fn triangles(&self) -> &[[usize; 3]];

    /// Overwrite vertex positions. `positions.len()` equals `vertices().len()`.
    fn set_vertices(&mut self, positions: &[Point3<f64>]);

    /// Recompute normals from the current positions.
    fn update_normals(&mut self);

    /// Recompute the bounding box from the current positions.
    fn update_bounding_box(&mut self);
}

/// A drag request for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragInfo {
    /// Index of the dragged piece.
    pub piece: usize,
    /// Piece-local index of the dragged vertex.
    pub vertex: usize,
    /// Where the user wants the vertex to go.
    pub target: Point3<f64>,
}

impl DragInfo {
    /// Create a drag request.
    #[must_use]
    pub const fn new(piece: usize, vertex: usize, target: Point3<f64>) -> Self {
        Self {
            piece,
            vertex,
            target,
        }
    }
}

/// An indexed triangle mesh cloth piece.
#[derive(Debug, Clone)]
pub struct ClothPiece {
    name: String,
    vertices: Vec<Point3<f64>>,
    triangles: Vec<[usize; 3]>,
    normals: Vec<Vector3<f64>>,
    bounds: (Point3<f64>, Point3<f64>),
    grid_size: Option<(usize, usize)>,
}

impl ClothPiece {
    /// Create a piece from vertices and triangles.
    #[must_use]
    pub fn new(name: &str, vertices: Vec<Point3<f64>>, triangles: Vec<[usize; 3]>) -> Self {
        let mut piece = Self {
            name: name.to_string(),
            normals: vec![Vector3::zeros(); vertices.len()],
            vertices,
            triangles,
            bounds: (Point3::origin(), Point3::origin()),
            grid_size: None,
        };
        piece.update_normals();
        piece.update_bounding_box();
        piece
    }

    /// Create a rectangular grid piece.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the piece
    /// * `origin` - Position of the (0,0) corner
    /// * `u_axis` - Direction and size of the U axis
    /// * `v_axis` - Direction and size of the V axis
    /// * `u_segments` - Number of segments along U
    /// * `v_segments` - Number of segments along V
    #[must_use]
    pub fn grid(
        name: &str,
        origin: Point3<f64>,
        u_axis: Vector3<f64>,
        v_axis: Vector3<f64>,
        u_segments: usize,
        v_segments: usize,
    ) -> Self {
        let u_segments = u_segments.max(1);
        let v_segments = v_segments.max(1);
        let u_verts = u_segments + 1;
        let v_verts = v_segments + 1;

        let mut vertices = Vec::with_capacity(u_verts * v_verts);
        for j in 0..v_verts {
            for i in 0..u_verts {
                let u = i as f64 / u_segments as f64;
                let v = j as f64 / v_segments as f64;
                vertices.push(origin + u_axis * u + v_axis * v);
            }
        }

        let mut triangles = Vec::with_capacity(2 * u_segments * v_segments);
        for j in 0..v_segments {
            for i in 0..u_segments {
                let idx00 = j * u_verts + i;
                let idx10 = j * u_verts + i + 1;
                let idx01 = (j + 1) * u_verts + i;
                let idx11 = (j + 1) * u_verts + i + 1;

                triangles.push([idx00, idx10, idx11]);
                triangles.push([idx00, idx11, idx01]);
            }
        }

        let mut piece = Self::new(name, vertices, triangles);
        piece.grid_size = Some((u_verts, v_verts));
        piece
    }

    /// Name of the piece.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of vertices.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Per-vertex unit normals (zero for isolated vertices).
    #[must_use]
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Axis-aligned bounds as `(min, max)`.
    #[must_use]
    pub const fn bounding_box(&self) -> (Point3<f64>, Point3<f64>) {
        self.bounds
    }

    /// Grid vertex counts `(u_verts, v_verts)` for pieces built by [`ClothPiece::grid`].
    #[must_use]
    pub const fn grid_size(&self) -> Option<(usize, usize)> {
        self.grid_size
    }

    /// Vertex index for grid coordinates, clamped to the grid.
    #[must_use]
    pub fn grid_vertex(&self, u: usize, v: usize) -> Option<usize> {
        self.grid_size.map(|(u_verts, v_verts)| {
            let u = u.min(u_verts - 1);
            let v = v.min(v_verts - 1);
            v * u_verts + u
        })
    }

    /// The four corner vertices of a grid piece, in `(0,0)`, `(u,0)`, `(0,v)`, `(u,v)` order.
    #[must_use]
    pub fn corner_vertices(&self) -> Option<[usize; 4]> {
        self.grid_size.map(|(u_verts, v_verts)| {
            [
                0,
                u_verts - 1,
                (v_verts - 1) * u_verts,
                v_verts * u_verts - 1,
            ]
        })
    }

    /// Corner positions of `t`, `None` if an index is out of range.
    fn corners(&self, t: &[usize; 3]) -> Option<[Point3<f64>; 3]> {
        Some([
            *self.vertices.get(t[0])?,
            *self.vertices.get(t[1])?,
            *self.vertices.get(t[2])?,
        ])
    }

    /// Total surface area. Faces with out-of-range indices are skipped.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .filter_map(|t| self.corners(t))
            .map(|[a, b, c]| 0.5 * (b - a).cross(&(c - a)).norm())
            .sum()
    }
}

impl ClothSurface for ClothPiece {
    fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    fn set_vertices(&mut self, positions: &[Point3<f64>]) {
        self.vertices.clear();
        self.vertices.extend_from_slice(positions);
    }

    fn update_normals(&mut self) {
        self.normals.clear();
        self.normals.resize(self.vertices.len(), Vector3::zeros());

        // Unnormalized cross product weights each face by twice its area.
        // Faces with out-of-range indices are left for topology validation.
        for t in &self.triangles {
            let Some([a, b, c]) = self.corners(t) else {
                continue;
            };
            let n = (b - a).cross(&(c - a));
            for &v in t {
                self.normals[v] += n;
            }
        }

        for n in &mut self.normals {
            let len = n.norm();
            if len > 1e-12 {
                *n /= len;
            }
        }
    }

    fn update_bounding_box(&mut self) {
        let Some(first) = self.vertices.first() else {
            self.bounds = (Point3::origin(), Point3::origin());
            return;
        };

        let mut min = *first;
        let mut max = *first;
        for p in &self.vertices {
            min = min.inf(p);
            max = max.sup(p);
        }
        self.bounds = (min, max);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> ClothPiece {
        ClothPiece::grid(
            "square",
            Point3::origin(),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            2,
            2,
        )
    }

    #[test]
    fn test_grid_counts() {
        let piece = square();
        assert_eq!(piece.num_vertices(), 9);
        assert_eq!(piece.num_triangles(), 8);
        assert_eq!(piece.grid_size(), Some((3, 3)));
        assert_eq!(piece.corner_vertices(), Some([0, 2, 6, 8]));
    }

    #[test]
    fn test_grid_vertex_clamps() {
        let piece = square();
        assert_eq!(piece.grid_vertex(0, 0), Some(0));
        assert_eq!(piece.grid_vertex(2, 2), Some(8));
        assert_eq!(piece.grid_vertex(9, 9), Some(8));
    }

    #[test]
    fn test_normals_point_along_z() {
        let piece = square();
        for n in piece.normals() {
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bounding_box_follows_vertices() {
        let mut piece = square();
        let moved: Vec<_> = piece
            .vertices()
            .iter()
            .map(|p| p + Vector3::new(0.0, 0.0, -2.0))
            .collect();
        piece.set_vertices(&moved);
        piece.update_bounding_box();

        let (min, max) = piece.bounding_box();
        assert_relative_eq!(min.z, -2.0);
        assert_relative_eq!(max.x, 1.0);
        assert_relative_eq!(max.y, 1.0);
    }

    #[test]
    fn test_surface_area() {
        assert_relative_eq!(square().surface_area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_piece() {
        let piece = ClothPiece::new("empty", Vec::new(), Vec::new());
        assert_eq!(piece.bounding_box(), (Point3::origin(), Point3::origin()));
        assert!(piece.grid_size().is_none());
    }

    #[test]
    fn test_out_of_range_face_is_skipped() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let piece = ClothPiece::new("bad", vertices, vec![[0, 1, 7], [0, 1, 2]]);
        assert_relative_eq!(piece.surface_area(), 0.5);
        assert_relative_eq!(piece.normals()[0], Vector3::z());
    }
}
