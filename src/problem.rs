use std::f64::consts::PI;

use nalgebra::{Matrix3, Vector2};
use tracing::info;

use crate::{
    datatypes::{ModelMetadata, NodeKind, ProblemKind, Vertex},
    error::Result,
    material::elastic_tensor,
    mesher::Mesh,
};

/// A boundary value problem on the mesh domain
///
/// The exact displacement doubles as the Dirichlet data on the boundary.
pub trait BoundaryValueProblem {
    fn exact_displacement(&self, vertex: &Vertex) -> Vector2<f64>;
    fn body_force(&self, vertex: &Vertex) -> Vector2<f64>;
}

/// Clamped boundary under a constant body force
#[derive(Debug, Clone)]
pub struct UniformLoad {
    pub force: Vector2<f64>,
}

impl BoundaryValueProblem for UniformLoad {
    fn exact_displacement(&self, _vertex: &Vertex) -> Vector2<f64> {
        Vector2::zeros()
    }

    fn body_force(&self, _vertex: &Vertex) -> Vector2<f64> {
        self.force
    }
}

/// Manufactured solution ux = uy = sin(pi x) sin(pi y)
///
/// The body force is derived from the same constitutive law the element
/// stiffness uses, so the discrete solution converges to the exact one.
#[derive(Debug, Clone)]
pub struct SineBubble {
    /// C11 of the elastic tensor
    normal: f64,
    /// C12
    coupling: f64,
    /// C33, acting on the engineering shear strain
    shear: f64,
}

impl SineBubble {
    pub fn new(tensor: &Matrix3<f64>) -> SineBubble {
        SineBubble {
            normal: tensor[(0, 0)],
            coupling: tensor[(0, 1)],
            shear: tensor[(2, 2)],
        }
    }
}

impl BoundaryValueProblem for SineBubble {
    fn exact_displacement(&self, vertex: &Vertex) -> Vector2<f64> {
        let s = (PI * vertex.x).sin() * (PI * vertex.y).sin();
        Vector2::new(s, s)
    }

    fn body_force(&self, vertex: &Vertex) -> Vector2<f64> {
        let s = (PI * vertex.x).sin() * (PI * vertex.y).sin();
        let c = (PI * vertex.x).cos() * (PI * vertex.y).cos();
        let f = PI * PI
            * ((self.normal + self.shear) * s - (self.coupling + self.shear) * c);
        Vector2::new(f, f)
    }
}

/// Builds the configured problem for a material tensor
pub fn build_problem(kind: &ProblemKind, tensor: &Matrix3<f64>) -> Box<dyn BoundaryValueProblem> {
    match kind {
        ProblemKind::UniformLoad { force } => Box::new(UniformLoad {
            force: Vector2::new(force[0], force[1]),
        }),
        ProblemKind::SineBubble => Box::new(SineBubble::new(tensor)),
    }
}

/// Prepares a mesh for assembly
///
/// Every cell receives the material tensor. Boundary nodes become Dirichlet
/// nodes whose prescribed value and starting displacement are the exact
/// solution; interior nodes are free and start at zero.
///
/// # Arguments
/// * `mesh` - The mesh to initialize in place
/// * `metadata` - Material and problem description
///
/// # Returns
/// The number of Dirichlet nodes
pub fn init_problem(mesh: &mut Mesh, metadata: &ModelMetadata) -> Result<usize> {
    let tensor = elastic_tensor(metadata.youngs_modulus, metadata.poisson_ratio)?;
    let problem = build_problem(&metadata.problem, &tensor);

    for cell in mesh.cells.iter_mut() {
        cell.tensor = tensor;
        cell.stress = None;
    }

    let boundary = mesh.boundary_nodes();
    let mut num_dirichlet = 0;

    for (node, on_boundary) in mesh.nodes.iter_mut().zip(boundary) {
        node.exact = problem.exact_displacement(&node.vertex);
        node.body_force = problem.body_force(&node.vertex);

        if on_boundary {
            node.kind = NodeKind::Dirichlet;
            node.prescribed = node.exact;
            node.displacement = node.exact;
            num_dirichlet += 1;
        } else {
            node.kind = NodeKind::Free;
            node.prescribed = Vector2::zeros();
            node.displacement = Vector2::zeros();
        }
    }

    info!("Number of Dirichlet nodes: {}", num_dirichlet);

    Ok(num_dirichlet)
}
