use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use tracing::info;

use crate::{
    datatypes::{Cell, Node, NodeKind},
    element::{element_stress, LocalVector, DOF},
    error::{FeldsparError, Result},
    geometry::ElementGeometry,
};

/// Discrete C-norm of the error against the reference solution
///
/// Maximum over free nodes and both components of |U - U_exact|.
pub fn c_norm_error(nodes: &[Node]) -> f64 {
    nodes
        .iter()
        .filter(|node| !node.is_dirichlet())
        .map(|node| (node.displacement - node.exact).amax())
        .fold(0.0, f64::max)
}

/// Calculates the stress in every cell from the current displacements
pub fn compute_stress(nodes: &[Node], cells: &mut [Cell]) -> Result<()> {
    for (idx, cell) in cells.iter_mut().enumerate() {
        let geometry = ElementGeometry::new(cell.nodes.map(|n| &nodes[n].vertex))
            .map_err(|err| err.in_cell(idx))?;

        let mut displacements = LocalVector::zeros();
        for (i, &n) in cell.nodes.iter().enumerate() {
            displacements[DOF * i] = nodes[n].displacement.x;
            displacements[DOF * i + 1] = nodes[n].displacement.y;
        }

        cell.stress = Some(element_stress(&geometry, &cell.tensor, &displacements));
    }

    Ok(())
}

fn create_csv(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|err| {
        FeldsparError::PostProcessor(format!("Failed to create {}: {err}", path.display()))
    })?;
    Ok(BufWriter::new(file))
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `nodes` - A reference to the vector of post-solve nodes
/// * `cells` - A reference to the vector of post-solve cells
/// * `output_dir` - Directory receiving nodes.csv and elements.csv
pub fn csv_output(nodes: &[Node], cells: &[Cell], output_dir: &Path) -> Result<()> {
    let stresses = cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            cell.stress.ok_or_else(|| {
                FeldsparError::PostProcessor(format!("Cell {idx} has no computed stress"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(output_dir)?;
    let nodes_output = output_dir.join("nodes.csv");
    let elements_output = output_dir.join("elements.csv");

    let mut nodes_file = create_csv(&nodes_output)?;
    writeln!(nodes_file, "x,y,ux,uy,exact_ux,exact_uy,kind,deformed_x,deformed_y")?;
    for node in nodes {
        let kind = match node.kind {
            NodeKind::Free => "free",
            NodeKind::Dirichlet => "dirichlet",
        };
        writeln!(
            nodes_file,
            "{x},{y},{ux},{uy},{ex},{ey},{kind},{dx},{dy}",
            x = node.vertex.x,
            y = node.vertex.y,
            ux = node.displacement.x,
            uy = node.displacement.y,
            ex = node.exact.x,
            ey = node.exact.y,
            dx = node.vertex.x + node.displacement.x,
            dy = node.vertex.y + node.displacement.y,
        )?;
    }
    nodes_file.flush()?;

    let mut elements_file = create_csv(&elements_output)?;
    writeln!(elements_file, "n0,n1,n2,sxx,syy,sxy")?;
    for (cell, stress) in cells.iter().zip(stresses) {
        writeln!(
            elements_file,
            "{n0},{n1},{n2},{sxx},{syy},{sxy}",
            n0 = cell.nodes[0],
            n1 = cell.nodes[1],
            n2 = cell.nodes[2],
            sxx = stress[0],
            syy = stress[1],
            sxy = stress[2],
        )?;
    }
    elements_file.flush()?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok(())
}
