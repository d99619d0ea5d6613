use nalgebra::{matrix, Matrix3, SMatrix};

use crate::{
    datatypes::Vertex,
    error::{FeldsparError, Result},
};

/// |detA| below this fraction of the squared longest edge marks a collapsed triangle
pub const DEGENERACY_TOLERANCE: f64 = 1e-12;

/// Affine-map data of a P1 triangle
#[derive(Debug, Clone)]
pub struct ElementGeometry {
    /// Row i holds (dphi_i/dx, dphi_i/dy)
    pub phi_grad: SMatrix<f64, 3, 2>,
    /// Signed determinant of [[1,1,1],[x0,x1,x2],[y0,y1,y2]]; |detA| is twice the area
    pub det_a: f64,
}

/// Builds the matrix [[1,1,1],[x0,x1,x2],[y0,y1,y2]]
fn affine_matrix(vertices: [&Vertex; 3]) -> Matrix3<f64> {
    let [v0, v1, v2] = vertices;
    matrix![
        1.0, 1.0, 1.0;
        v0.x, v1.x, v2.x;
        v0.y, v1.y, v2.y;
    ]
}

/// Determinant of a 3x3 matrix by explicit cofactor expansion
pub fn cofactor_determinant(a: &Matrix3<f64>) -> f64 {
    let positive = a[(0, 0)] * a[(1, 1)] * a[(2, 2)]
        + a[(0, 1)] * a[(1, 2)] * a[(2, 0)]
        + a[(0, 2)] * a[(1, 0)] * a[(2, 1)];
    let negative = a[(0, 2)] * a[(1, 1)] * a[(2, 0)]
        + a[(2, 1)] * a[(1, 2)] * a[(0, 0)]
        + a[(2, 2)] * a[(1, 0)] * a[(0, 1)];

    positive - negative
}

/// Determinant of the edge-vector Jacobian [[x1-x0, x2-x0],[y1-y0, y2-y0]]
///
/// Equal to detA for the same vertex ordering.
pub fn edge_jacobian_determinant(vertices: [&Vertex; 3]) -> f64 {
    let [v0, v1, v2] = vertices;
    (v1.x - v0.x) * (v2.y - v0.y) - (v2.x - v0.x) * (v1.y - v0.y)
}

/// Calculates the area of a triangle
pub fn triangle_area(vertices: [&Vertex; 3]) -> f64 {
    0.5 * edge_jacobian_determinant(vertices).abs()
}

fn longest_edge_squared(vertices: [&Vertex; 3]) -> f64 {
    let [v0, v1, v2] = vertices;
    let d = |a: &Vertex, b: &Vertex| (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
    d(v0, v1).max(d(v1, v2)).max(d(v2, v0))
}

impl ElementGeometry {
    /// Computes the shape-function gradients and detA of a triangle
    ///
    /// # Arguments
    /// * `vertices` - The three vertices, in the order stored on the cell
    ///
    /// # Returns
    /// The element geometry, or `DegenerateElement` for a zero-area triangle
    pub fn new(vertices: [&Vertex; 3]) -> Result<ElementGeometry> {
        let a = affine_matrix(vertices);
        let det_a = cofactor_determinant(&a);

        let scale = longest_edge_squared(vertices);
        if !det_a.is_finite() || det_a.abs() <= DEGENERACY_TOLERANCE * scale {
            return Err(FeldsparError::DegenerateElement { det: det_a });
        }

        let a_inv = a
            .try_inverse()
            .ok_or(FeldsparError::DegenerateElement { det: det_a })?;

        let b: SMatrix<f64, 3, 2> = matrix![
            0.0, 0.0;
            1.0, 0.0;
            0.0, 1.0;
        ];

        Ok(ElementGeometry {
            phi_grad: a_inv * b,
            det_a,
        })
    }

    pub fn area(&self) -> f64 {
        0.5 * self.det_a.abs()
    }
}
