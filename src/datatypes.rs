use std::time::Duration;

use nalgebra::{Matrix3, Vector2, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Vertex {
        Vertex { x, y }
    }
}

/// Classification of a node for the assembled system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Both displacement components are unknowns
    Free,
    /// Displacement is prescribed; the node carries no equations
    Dirichlet,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub vertex: Vertex,
    pub kind: NodeKind,
    /// Current displacement (ux, uy)
    pub displacement: Vector2<f64>,
    /// Boundary value, only meaningful for Dirichlet nodes
    pub prescribed: Vector2<f64>,
    /// Body-force sample (fx, fy)
    pub body_force: Vector2<f64>,
    /// Reference solution sampled at the node
    pub exact: Vector2<f64>,
}

impl Node {
    pub fn new(vertex: Vertex) -> Node {
        Node {
            vertex,
            kind: NodeKind::Free,
            displacement: Vector2::zeros(),
            prescribed: Vector2::zeros(),
            body_force: Vector2::zeros(),
            exact: Vector2::zeros(),
        }
    }

    pub fn is_dirichlet(&self) -> bool {
        self.kind == NodeKind::Dirichlet
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub nodes: [usize; 3],
    /// Elastic tensor acting on (exx, eyy, 2exy)
    pub tensor: Matrix3<f64>,
    /// (sxx, syy, sxy), filled in after a solve
    pub stress: Option<Vector3<f64>>,
}

impl Cell {
    pub fn new(nodes: [usize; 3]) -> Cell {
        Cell {
            nodes,
            tensor: Matrix3::zeros(),
            stress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRule {
    /// Exact integral of the linearly interpolated body force
    Linear,
    /// Mean of the three nodal samples held constant over the cell
    Centroid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMethod {
    ConjugateGradient,
    Cholesky,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProblemKind {
    /// Zero boundary displacement under a constant body force
    UniformLoad { force: [f64; 2] },
    /// Manufactured solution ux = uy = sin(pi x) sin(pi y)
    SineBubble,
}

/// Linear solver selection and stopping criteria
///
/// Both backends require |b - Ax| <= max(absolute_tolerance,
/// relative_tolerance * |b|). The relative default sits above the round-off
/// floor of roughly eps * cond(A) * |b| that fine meshes reach in f64.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub method: SolverMethod,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    pub max_iterations: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            method: SolverMethod::ConjugateGradient,
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-15,
            max_iterations: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub problem: ProblemKind,
    pub load_rule: LoadRule,
    pub solver: SolverSettings,
    pub unit_square_divisions: Option<usize>,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        ModelMetadata {
            youngs_modulus: 3.5e6,
            poisson_ratio: 0.3,
            problem: ProblemKind::UniformLoad {
                force: [-3e7, 0.0],
            },
            load_rule: LoadRule::Linear,
            solver: SolverSettings::default(),
            unit_square_divisions: None,
        }
    }
}

/// Wall-clock time spent in each stage of a run
#[derive(Debug, Clone, Default)]
pub struct TimingStats {
    pub init: Duration,
    pub assemble: Duration,
    pub precond: Duration,
    pub solve: Duration,
    pub update: Duration,
    pub io: Duration,
}

impl TimingStats {
    pub fn summary(&self, total: Duration) -> String {
        format!(
            "\n+=========================\n\
             | T_assemble = {:.6}\n\
             | T_precond  = {:.6}\n\
             | T_solve    = {:.6}\n\
             | T_IO       = {:.6}\n\
             | T_update   = {:.6}\n\
             | T_init     = {:.6}\n\
             +-------------------------\n\
             | T_total    = {:.6}\n\
             +=========================",
            self.assemble.as_secs_f64(),
            self.precond.as_secs_f64(),
            self.solve.as_secs_f64(),
            self.io.as_secs_f64(),
            self.update.as_secs_f64(),
            self.init.as_secs_f64(),
            total.as_secs_f64(),
        )
    }
}
