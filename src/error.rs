use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeldsparError>;

#[derive(Debug, Error)]
pub enum FeldsparError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Mesher error: {0}")]
    Mesher(String),

    #[error("Mesher error: cell {cell} has {nodes} nodes, only triangles are supported")]
    NonTriangularCell { cell: usize, nodes: usize },

    #[error("Assembly error: cell {cell} references the same node more than once")]
    DuplicateCellNode { cell: usize },

    #[error("Assembly error: degenerate triangle (detA = {det:e})")]
    DegenerateElement { det: f64 },

    #[error("Assembly error: local stiffness matrix is not symmetric (max deviation {deviation:e})")]
    AsymmetricStiffness { deviation: f64 },

    #[error("Material error: E = {youngs_modulus}, nu = {poisson_ratio} gives a singular elastic tensor")]
    DegenerateMaterial {
        youngs_modulus: f64,
        poisson_ratio: f64,
    },

    #[error("in cell {cell}: {source}")]
    Cell {
        cell: usize,
        source: Box<FeldsparError>,
    },

    #[error("Solver error: linear solver failed: {reason} (residual {residual:e})")]
    Solver { reason: String, residual: f64 },

    #[error("Post Processor error: {0}")]
    PostProcessor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeldsparError {
    /// Attaches the index of the offending cell
    pub fn in_cell(self, cell: usize) -> FeldsparError {
        FeldsparError::Cell {
            cell,
            source: Box::new(self),
        }
    }
}
