use nalgebra::{Matrix3, SMatrix, SVector, Vector2};

use crate::{
    datatypes::{LoadRule, Vertex},
    error::{FeldsparError, Result},
    geometry::{edge_jacobian_determinant, ElementGeometry},
};

/// Displacement components per node
pub const DOF: usize = 2;
/// DOFs per element, ordered [Ux0, Uy0, Ux1, Uy1, Ux2, Uy2]
pub const ELEMENT_DOF: usize = 3 * DOF;

/// Relative tolerance of the local stiffness symmetry check
pub const SYMMETRY_TOLERANCE: f64 = 1e-10;

pub type LocalMatrix = SMatrix<f64, ELEMENT_DOF, ELEMENT_DOF>;
pub type LocalVector = SVector<f64, ELEMENT_DOF>;

/// Ephemeral per-element system
#[derive(Debug, Clone)]
pub struct LocalSystem {
    pub stiffness: LocalMatrix,
    pub load: LocalVector,
}

/// Calculates the strain-displacement matrix of the element
///
/// Maps the node-major DOFs to (exx, eyy, 2exy).
///
/// # Arguments
/// * `phi_grad` - The basis function gradients, one row per node
///
/// # Returns
/// A 3x6 strain-displacement matrix
pub fn strain_displacement_matrix(phi_grad: &SMatrix<f64, 3, 2>) -> SMatrix<f64, 3, ELEMENT_DOF> {
    let mut r: SMatrix<f64, 3, ELEMENT_DOF> = SMatrix::zeros();

    for i in 0..3 {
        let dx = phi_grad[(i, 0)];
        let dy = phi_grad[(i, 1)];

        r[(0, DOF * i)] = dx;
        r[(1, DOF * i + 1)] = dy;
        r[(2, DOF * i)] = dy;
        r[(2, DOF * i + 1)] = dx;
    }

    r
}

/// Largest |W_ij - W_ji| relative to the largest entry of W
pub fn symmetry_deviation(w: &LocalMatrix) -> f64 {
    let scale = w.amax().max(f64::MIN_POSITIVE);
    (w - w.transpose()).amax() / scale
}

/// Computes the stiffness matrix for a given element
///
/// W = |detA| / 2 * R^T * C * R
///
/// # Arguments
/// * `geometry` - The element's shape-function data
/// * `tensor` - The element's elastic tensor
///
/// # Returns
/// A symmetric 6x6 stiffness matrix, or `AsymmetricStiffness`
pub fn element_stiffness_matrix(geometry: &ElementGeometry, tensor: &Matrix3<f64>) -> Result<LocalMatrix> {
    let r = strain_displacement_matrix(&geometry.phi_grad);
    let w = r.transpose() * tensor * r * (0.5 * geometry.det_a.abs());

    let deviation = symmetry_deviation(&w);
    if !(deviation <= SYMMETRY_TOLERANCE) {
        return Err(FeldsparError::AsymmetricStiffness { deviation });
    }

    Ok(w)
}

/// Integrates the body force against each basis function
///
/// With |T| the physical area (|detBk| / 2):
/// * `Linear` - f is interpolated linearly from the samples; the load of
///   node i is |T|/12 * (f_i + sum_j f_j), the exact integral.
/// * `Centroid` - f is the mean sample; every node gets |detBk|/18 * sum_j f_j.
///
/// # Arguments
/// * `vertices` - The three vertices of the cell
/// * `forces` - Body-force samples at the three vertices
/// * `rule` - The integration rule
///
/// # Returns
/// The node-major 6x1 load vector
pub fn element_load_vector(vertices: [&Vertex; 3], forces: [&Vector2<f64>; 3], rule: LoadRule) -> LocalVector {
    let det_bk = edge_jacobian_determinant(vertices).abs();
    let total: Vector2<f64> = forces.iter().copied().sum();

    let mut load = LocalVector::zeros();
    for (i, f_i) in forces.iter().enumerate() {
        let nodal = match rule {
            LoadRule::Linear => (*f_i + total) * (det_bk / 24.0),
            LoadRule::Centroid => total * (det_bk / 18.0),
        };
        load[DOF * i] = nodal.x;
        load[DOF * i + 1] = nodal.y;
    }

    load
}

/// Builds the local stiffness matrix and load vector of one triangle
pub fn assemble_local_system(
    vertices: [&Vertex; 3],
    forces: [&Vector2<f64>; 3],
    tensor: &Matrix3<f64>,
    rule: LoadRule,
) -> Result<LocalSystem> {
    let geometry = ElementGeometry::new(vertices)?;
    let stiffness = element_stiffness_matrix(&geometry, tensor)?;
    let load = element_load_vector(vertices, forces, rule);

    Ok(LocalSystem { stiffness, load })
}

/// Calculates the stress in an element from its nodal displacements
pub fn element_stress(
    geometry: &ElementGeometry,
    tensor: &Matrix3<f64>,
    displacements: &LocalVector,
) -> nalgebra::Vector3<f64> {
    tensor * strain_displacement_matrix(&geometry.phi_grad) * displacements
}
