//! Merging cloth pieces into one global index space.
//!
//! Pieces are concatenated in order. Piece `i` owns the global vertex range
//! `cloth_vert_begin[i]..cloth_vert_begin[i + 1]`; its triangles are shifted
//! by `cloth_vert_begin[i]`. Coincident vertices of different pieces stay
//! distinct.

use nalgebra::{Point3, Vector3};

use crate::piece::ClothSurface;

/// The merged vertex/triangle arrays of every piece.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedMesh {
    /// Global vertex positions.
    pub x: Vec<Point3<f64>>,
    /// Global vertex velocities.
    pub v: Vec<Vector3<f64>>,
    /// Per-vertex pin weight (0 = free).
    pub fixed: Vec<f64>,
    /// Triangles as global vertex indices.
    pub t: Vec<[usize; 3]>,
    /// Piece boundary table, `num_pieces + 1` entries.
    pub cloth_vert_begin: Vec<usize>,
}

impl MergedMesh {
    /// Concatenate `pieces`, resetting velocities and pin weights to zero.
    #[must_use]
    pub fn from_pieces<P: ClothSurface>(pieces: &[P]) -> Self {
        let num_vertices: usize = pieces.iter().map(|p| p.vertices().len()).sum();
        let num_triangles: usize = pieces.iter().map(|p| p.triangles().len()).sum();

        let mut x = Vec::with_capacity(num_vertices);
        let mut t = Vec::with_capacity(num_triangles);
        let mut cloth_vert_begin = Vec::with_capacity(pieces.len() + 1);
        cloth_vert_begin.push(0);

        for piece in pieces {
            let offset = x.len();
            x.extend_from_slice(piece.vertices());
            t.extend(
                piece
                    .triangles()
                    .iter()
                    .map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]),
            );
            cloth_vert_begin.push(x.len());
        }

        Self {
            v: vec![Vector3::zeros(); x.len()],
            fixed: vec![0.0; x.len()],
            x,
            t,
            cloth_vert_begin,
        }
    }

    /// Number of vertices.
    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.x.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn num_triangles(&self) -> usize {
        self.t.len()
    }

    /// Number of pieces.
    #[must_use]
    pub fn num_pieces(&self) -> usize {
        self.cloth_vert_begin.len().saturating_sub(1)
    }

    /// Global vertex range owned by `piece`.
    #[must_use]
    pub fn piece_range(&self, piece: usize) -> Option<std::ops::Range<usize>> {
        let begin = *self.cloth_vert_begin.get(piece)?;
        let end = *self.cloth_vert_begin.get(piece.checked_add(1)?)?;
        Some(begin..end)
    }

    /// Global index of a piece-local vertex.
    #[must_use]
    pub fn global_index(&self, piece: usize, vertex: usize) -> Option<usize> {
        let range = self.piece_range(piece)?;
        let global = range.start.checked_add(vertex)?;
        (global < range.end).then_some(global)
    }

    /// Piece and piece-local index of a global vertex.
    #[must_use]
    pub fn piece_of(&self, global: usize) -> Option<(usize, usize)> {
        if global >= self.num_vertices() {
            return None;
        }
        // Last boundary <= global; empty pieces share a boundary with their successor.
        let piece = self.cloth_vert_begin.partition_point(|&b| b <= global) - 1;
        Some((piece, global - self.cloth_vert_begin[piece]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::ClothPiece;

    fn pieces() -> Vec<ClothPiece> {
        vec![
            ClothPiece::grid(
                "front",
                Point3::origin(),
                Vector3::x(),
                Vector3::y(),
                1,
                1,
            ),
            ClothPiece::new("empty", Vec::new(), Vec::new()),
            ClothPiece::grid(
                "back",
                Point3::origin(),
                Vector3::x(),
                Vector3::y(),
                2,
                1,
            ),
        ]
    }

    #[test]
    fn test_concatenation() {
        let merged = MergedMesh::from_pieces(&pieces());

        assert_eq!(merged.num_vertices(), 4 + 6);
        assert_eq!(merged.num_triangles(), 2 + 4);
        assert_eq!(merged.cloth_vert_begin, vec![0, 4, 4, 10]);
        assert_eq!(merged.num_pieces(), 3);

        // Coincident origins stay distinct.
        assert_eq!(merged.x[0], merged.x[4]);
        assert!(merged.v.iter().all(|v| *v == Vector3::zeros()));
        assert!(merged.fixed.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_triangles_are_offset() {
        let merged = MergedMesh::from_pieces(&pieces());
        assert_eq!(merged.t[0], [0, 1, 3]);
        assert_eq!(merged.t[2], [4, 5, 8]);
        assert!(merged.t.iter().flatten().all(|&i| i < merged.num_vertices()));
    }

    #[test]
    fn test_index_mapping() {
        let merged = MergedMesh::from_pieces(&pieces());
        assert_eq!(merged.global_index(2, 1), Some(5));
        assert_eq!(merged.global_index(1, 0), None);
        assert_eq!(merged.global_index(0, 4), None);
        assert_eq!(merged.global_index(3, 0), None);

        assert_eq!(merged.piece_of(5), Some((2, 1)));
        assert_eq!(merged.piece_of(3), Some((0, 3)));
        assert_eq!(merged.piece_of(4), Some((2, 0)));
        assert_eq!(merged.piece_of(10), None);
    }

    #[test]
    fn test_index_mapping_rejects_huge_indices() {
        let merged = MergedMesh::from_pieces(&pieces());
        assert_eq!(merged.global_index(2, usize::MAX), None);
        assert_eq!(merged.global_index(usize::MAX, 0), None);
        assert!(merged.piece_range(usize::MAX).is_none());
    }

    #[test]
    fn test_empty_input() {
        let merged = MergedMesh::from_pieces::<ClothPiece>(&[]);
        assert_eq!(merged.num_vertices(), 0);
        assert_eq!(merged.cloth_vert_begin, vec![0]);
        assert_eq!(merged.num_pieces(), 0);
    }
}
