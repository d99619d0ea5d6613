use std::{path::Path, time::Instant};

use tracing::{debug, info};

use crate::{
    assembly::{assemble_global_system, DofMap, GlobalSystem},
    datatypes::{ModelMetadata, TimingStats},
    element::DOF,
    error::{FeldsparError, Result},
    mesher::Mesh,
    post_processor::{c_norm_error, compute_stress, csv_output},
    problem::init_problem,
    solver::{self, LinearSolver},
};

/// Summary of a successful solve
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub iterations: u64,
    pub residual: f64,
    pub c_norm_error: f64,
}

/// Owns the mesh state between the pipeline stages
///
/// The assembled system is stored only when every cell scattered
/// successfully. A solve consumes it, since the residual refers to the
/// displacement it was assembled from.
pub struct Simulation {
    pub mesh: Mesh,
    pub metadata: ModelMetadata,
    pub stats: TimingStats,
    dofs: DofMap,
    system: Option<GlobalSystem>,
}

impl Simulation {
    /// Initializes the problem on a mesh and numbers the free equations
    pub fn new(mut mesh: Mesh, metadata: ModelMetadata) -> Result<Simulation> {
        let mut stats = TimingStats::default();
        let timer = Instant::now();

        init_problem(&mut mesh, &metadata)?;
        let dofs = DofMap::new(&mesh.nodes);

        stats.init = timer.elapsed();
        info!(
            "Number of cells: {}, number of nodes: {}, unknowns: {}",
            mesh.cells.len(),
            mesh.nodes.len(),
            dofs.num_equations()
        );

        Ok(Simulation {
            mesh,
            metadata,
            stats,
            dofs,
            system: None,
        })
    }

    pub fn dofs(&self) -> &DofMap {
        &self.dofs
    }

    /// The last successfully assembled system, if it has not been solved yet
    pub fn system(&self) -> Option<&GlobalSystem> {
        self.system.as_ref()
    }

    /// Rebuilds the global system from the current node state
    ///
    /// Equations are renumbered from the current node kinds first. On error
    /// no system is kept, so a partial sum can never be solved.
    pub fn assemble_global_system(&mut self) -> Result<()> {
        let timer = Instant::now();
        self.system = None;
        self.dofs = DofMap::new(&self.mesh.nodes);

        let mut system = GlobalSystem::new(self.dofs.num_equations());
        assemble_global_system(
            &self.mesh.nodes,
            &self.mesh.cells,
            &self.dofs,
            self.metadata.load_rule,
            &mut system,
        )?;

        debug!("global system holds {} contributions", system.num_contributions());
        self.system = Some(system);
        self.stats.assemble += timer.elapsed();

        Ok(())
    }

    /// Solves the assembled system and applies the correction to free nodes
    ///
    /// Dirichlet nodes keep their prescribed displacement. Nothing is
    /// updated when the solver fails.
    pub fn solve_system(&mut self, linear_solver: &dyn LinearSolver) -> Result<SolveOutcome> {
        let system = self.system.as_ref().ok_or_else(|| FeldsparError::Solver {
            reason: "no assembled system to solve".to_owned(),
            residual: f64::NAN,
        })?;

        let timer = Instant::now();
        let jacobian = system.jacobian_csr();
        self.stats.precond += timer.elapsed();

        let timer = Instant::now();
        let report = solver::run(linear_solver, &jacobian, system.residual())?;
        self.stats.solve += timer.elapsed();

        let timer = Instant::now();
        for (idx, node) in self.mesh.nodes.iter_mut().enumerate() {
            let Some(eq) = self.dofs.equation(idx) else {
                continue;
            };
            for a in 0..DOF {
                node.displacement[a] -= report.solution[eq + a];
            }
        }
        self.system = None;
        self.stats.update += timer.elapsed();

        let c_norm_error = c_norm_error(&self.mesh.nodes);
        info!("|err|_C = {:e}", c_norm_error);

        Ok(SolveOutcome {
            iterations: report.iterations,
            residual: report.residual,
            c_norm_error,
        })
    }

    /// Computes cell stresses and writes the csv results
    pub fn write_output(&mut self, output_dir: &Path) -> Result<()> {
        let timer = Instant::now();

        compute_stress(&self.mesh.nodes, &mut self.mesh.cells)?;
        csv_output(&self.mesh.nodes, &self.mesh.cells, output_dir)?;

        self.stats.io += timer.elapsed();
        Ok(())
    }
}
