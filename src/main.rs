use std::{path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use tracing::{error, info};

use feldspar::{error::Result, input, mesher, simulation::Simulation, solver};

const DEFAULT_DIVISIONS: usize = 8;

/// Plane linear elasticity on triangular meshes
#[derive(Parser, Debug)]
#[command(name = "feldspar", version, about)]
struct Cli {
    /// Input json with material, problem and solver settings
    input: PathBuf,

    /// Gmsh 4 ASCII mesh; the unit square is meshed when omitted
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// Unit square divisions, overrides the input file
    #[arg(long)]
    divisions: Option<usize>,

    /// Directory for nodes.csv and elements.csv
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let start = Instant::now();

    let metadata = input::run(&cli.input)?;
    let divisions = cli
        .divisions
        .or(metadata.unit_square_divisions)
        .unwrap_or(DEFAULT_DIVISIONS);

    let mesh = mesher::run(cli.mesh.as_deref(), divisions)?;
    let linear_solver = solver::build_solver(&metadata.solver);

    let mut simulation = Simulation::new(mesh, metadata)?;
    simulation.assemble_global_system()?;
    let outcome = simulation.solve_system(linear_solver.as_ref())?;
    info!(
        "solved in {} iterations, residual {:e}",
        outcome.iterations, outcome.residual
    );

    simulation.write_output(&cli.output_dir)?;

    info!("{}", simulation.stats.summary(start.elapsed()));

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
