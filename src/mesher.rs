use std::{collections::HashMap, path::Path};

use tracing::{info, warn};

use crate::{
    datatypes::{Cell, Node, Vertex},
    error::{FeldsparError, Result},
};

/// Gmsh element type of the 3-node triangle
const GMSH_TRIANGLE: usize = 2;

enum MeshParseState {
    Format,
    Nodes,
    Elements,
    Limbo,
}

/// Triangulated domain: nodes plus cells referencing them by index
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub cells: Vec<Cell>,
}

impl Mesh {
    /// Structured mesh of the unit square
    ///
    /// The square is cut into `divisions` x `divisions` sub-squares, each
    /// split along its lower-left to upper-right diagonal. Both triangles of
    /// a sub-square are counter-clockwise.
    pub fn unit_square(divisions: usize) -> Result<Mesh> {
        if divisions == 0 {
            return Err(FeldsparError::Mesher(
                "unit square needs at least one division".to_owned(),
            ));
        }

        let n = divisions;
        let h = 1.0 / n as f64;
        let index = |i: usize, j: usize| j * (n + 1) + i;

        let mut nodes = Vec::with_capacity((n + 1) * (n + 1));
        for j in 0..=n {
            for i in 0..=n {
                nodes.push(Node::new(Vertex::new(i as f64 * h, j as f64 * h)));
            }
        }

        let mut cells = Vec::with_capacity(2 * n * n);
        for j in 0..n {
            for i in 0..n {
                let p00 = index(i, j);
                let p10 = index(i + 1, j);
                let p11 = index(i + 1, j + 1);
                let p01 = index(i, j + 1);
                cells.push(Cell::new([p00, p10, p11]));
                cells.push(Cell::new([p00, p11, p01]));
            }
        }

        Ok(Mesh { nodes, cells })
    }

    /// Flags nodes lying on an edge that belongs to exactly one cell
    pub fn boundary_nodes(&self) -> Vec<bool> {
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for cell in &self.cells {
            let [a, b, c] = cell.nodes;
            for (p, q) in [(a, b), (b, c), (c, a)] {
                *edge_count.entry((p.min(q), p.max(q))).or_insert(0) += 1;
            }
        }

        let mut on_boundary = vec![false; self.nodes.len()];
        for ((p, q), count) in edge_count {
            if count == 1 {
                for n in [p, q] {
                    if let Some(flag) = on_boundary.get_mut(n) {
                        *flag = true;
                    }
                }
            }
        }

        on_boundary
    }

    /// Drops nodes that no cell references and renumbers the cells
    ///
    /// Such nodes would own equations with empty rows. Returns the number of
    /// nodes removed.
    pub fn remove_unreferenced_nodes(&mut self) -> usize {
        let mut renumbered: Vec<Option<usize>> = vec![None; self.nodes.len()];
        for cell in &self.cells {
            for &n in &cell.nodes {
                if let Some(slot) = renumbered.get_mut(n) {
                    *slot = Some(0);
                }
            }
        }

        let mut kept = 0;
        for slot in renumbered.iter_mut().flatten() {
            *slot = kept;
            kept += 1;
        }

        let removed = self.nodes.len() - kept;
        if removed == 0 {
            return 0;
        }

        let mut idx = 0;
        self.nodes.retain(|_| {
            let keep = renumbered[idx].is_some();
            idx += 1;
            keep
        });

        for cell in self.cells.iter_mut() {
            for n in cell.nodes.iter_mut() {
                if let Some(Some(new)) = renumbered.get(*n) {
                    *n = *new;
                }
            }
        }

        removed
    }
}

fn parse_fields<T: std::str::FromStr>(line: &str, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|field| {
            field.parse().map_err(|_| {
                FeldsparError::Mesher(format!("Unexpected value '{field}' in {what}: '{line}'"))
            })
        })
        .collect()
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    lines
        .next()
        .map(str::trim)
        .ok_or_else(|| FeldsparError::Mesher(format!("Mesh file ended inside {what}")))
}

fn block_header(fields: &[usize], what: &str) -> Result<(usize, usize, usize)> {
    match fields {
        [dim, _tag, kind, count] => Ok((*dim, *kind, *count)),
        _ => Err(FeldsparError::Mesher(format!(
            "Malformed {what} block header: expected 4 fields, found {}",
            fields.len()
        ))),
    }
}

/// Parses the contents of a gmsh 4 ASCII mesh
///
/// Only 2D elements become cells; lower-dimensional entities are skipped,
/// and so are nodes that only they use.
pub fn parse_mesh_str(contents: &str) -> Result<Mesh> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines();

    let mut nodes: Vec<Node> = Vec::new();
    let mut node_index: HashMap<usize, usize> = HashMap::new();
    let mut cell_tags: Vec<[usize; 3]> = Vec::new();
    let mut skipped_elements: usize = 0;

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$MeshFormat") {
                    parser_state = MeshParseState::Format;
                } else if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Format => {
                if !line.starts_with('4') {
                    return Err(FeldsparError::Mesher(format!(
                        "Unsupported mesh format '{line}', expected gmsh 4.x ASCII"
                    )));
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let header: Vec<usize> = parse_fields(line, "node block")?;
                let (_, parametric, num_nodes_local) = block_header(&header, "node")?;
                if parametric != 0 {
                    return Err(FeldsparError::Mesher(
                        "Parametric node coordinates are not supported".to_owned(),
                    ));
                }

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> = parse_fields(next_line(&mut lines, "$Nodes")?, "node tag")?;
                    match tag.as_slice() {
                        [tag] => node_tags.push(*tag),
                        _ => {
                            return Err(FeldsparError::Mesher(
                                "Expected one node tag per line".to_owned(),
                            ))
                        }
                    }
                }

                for tag in node_tags {
                    let coords: Vec<f64> =
                        parse_fields(next_line(&mut lines, "$Nodes")?, "node coordinates")?;
                    if coords.len() < 2 {
                        return Err(FeldsparError::Mesher(format!(
                            "Node {tag} has fewer than two coordinates"
                        )));
                    }

                    if node_index.insert(tag, nodes.len()).is_some() {
                        return Err(FeldsparError::Mesher(format!("Duplicate node tag {tag}")));
                    }
                    nodes.push(Node::new(Vertex::new(coords[0], coords[1])));
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                let header: Vec<usize> = parse_fields(line, "element block")?;
                let (entity_dim, element_type, num_elements) = block_header(&header, "element")?;

                for _ in 0..num_elements {
                    let element: Vec<usize> =
                        parse_fields(next_line(&mut lines, "$Elements")?, "element data")?;

                    if entity_dim != 2 {
                        skipped_elements += 1;
                        continue;
                    }

                    let node_count = element.len().saturating_sub(1);
                    if element_type != GMSH_TRIANGLE || node_count != 3 {
                        return Err(FeldsparError::NonTriangularCell {
                            cell: cell_tags.len(),
                            nodes: node_count,
                        });
                    }

                    cell_tags.push([element[1], element[2], element[3]]);
                }
            }
        }
    }

    let mut cells = Vec::with_capacity(cell_tags.len());
    for tags in cell_tags {
        let mut indices = [0; 3];
        for (slot, tag) in indices.iter_mut().zip(tags) {
            *slot = *node_index.get(&tag).ok_or_else(|| {
                FeldsparError::Mesher(format!("Element references unknown node tag {tag}"))
            })?;
        }
        cells.push(Cell::new(indices));
    }

    if skipped_elements > 0 {
        warn!("skipped {} lower-dimensional mesh elements", skipped_elements);
    }

    let mut mesh = Mesh { nodes, cells };
    let unreferenced = mesh.remove_unreferenced_nodes();
    if unreferenced > 0 {
        warn!("dropped {} mesh nodes not used by any triangle", unreferenced);
    }

    Ok(mesh)
}

/// Parses a .msh file into nodes and cells
///
/// # Arguments
/// * `mesh_file` - The path to the mesh file
///
/// # Returns
/// The mesh, with node indices in file order among the nodes cells use
pub fn parse_mesh(mesh_file: &Path) -> Result<Mesh> {
    let contents = std::fs::read_to_string(mesh_file).map_err(|err| {
        FeldsparError::Mesher(format!(
            "Unable to open mesh file {}: {err}",
            mesh_file.display()
        ))
    })?;

    parse_mesh_str(&contents)
}

/// Loads the mesh from a file or generates the unit square
///
/// # Arguments
/// * `mesh_file` - Optional gmsh file; takes precedence when given
/// * `divisions` - Unit-square resolution used without a mesh file
pub fn run(mesh_file: Option<&Path>, divisions: usize) -> Result<Mesh> {
    let mesh = match mesh_file {
        Some(path) => parse_mesh(path)?,
        None => Mesh::unit_square(divisions)?,
    };

    if mesh.cells.is_empty() {
        return Err(FeldsparError::Mesher("Mesh contains no cells".to_owned()));
    }

    info!(
        "loaded {} nodes and {} cells",
        mesh.nodes.len(),
        mesh.cells.len()
    );

    Ok(mesh)
}
