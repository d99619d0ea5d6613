use indicatif::ProgressBar;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::debug;

use crate::{
    datatypes::{Cell, LoadRule, Node},
    element::{assemble_local_system, DOF},
    error::{FeldsparError, Result},
};

/// Accumulator for an assembled linear system
///
/// Every call adds to what is already stored; nothing is ever overwritten.
pub trait SystemBuilder {
    fn add_to_row(&mut self, row: usize, value: f64);
    fn add_to_matrix_entry(&mut self, row: usize, col: usize, value: f64);
}

/// Equation numbering over the free nodes
///
/// Free node k (in node order) owns equations 2k (Ux) and 2k+1 (Uy).
#[derive(Debug, Clone)]
pub struct DofMap {
    equations: Vec<Option<usize>>,
    num_equations: usize,
}

impl DofMap {
    pub fn new(nodes: &[Node]) -> DofMap {
        let mut num_equations = 0;
        let equations = nodes
            .iter()
            .map(|node| {
                if node.is_dirichlet() {
                    None
                } else {
                    let first = num_equations;
                    num_equations += DOF;
                    Some(first)
                }
            })
            .collect();

        DofMap {
            equations,
            num_equations,
        }
    }

    /// First equation (the Ux row) of a node, `None` for Dirichlet nodes
    pub fn equation(&self, node: usize) -> Option<usize> {
        self.equations[node]
    }

    pub fn num_equations(&self) -> usize {
        self.num_equations
    }

    pub fn num_free_nodes(&self) -> usize {
        self.num_equations / DOF
    }
}

/// Sparse system over the free-node unknowns, in residual form
///
/// `jacobian * correction = residual`; the correction is subtracted from the
/// current displacement.
#[derive(Debug, Clone)]
pub struct GlobalSystem {
    jacobian: CooMatrix<f64>,
    residual: DVector<f64>,
}

impl GlobalSystem {
    pub fn new(size: usize) -> GlobalSystem {
        GlobalSystem {
            jacobian: CooMatrix::new(size, size),
            residual: DVector::zeros(size),
        }
    }

    pub fn size(&self) -> usize {
        self.residual.len()
    }

    /// Drops every accumulated contribution
    pub fn clear(&mut self) {
        let size = self.size();
        self.jacobian = CooMatrix::new(size, size);
        self.residual.fill(0.0);
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    /// Number of stored (possibly duplicate) matrix contributions
    pub fn num_contributions(&self) -> usize {
        self.jacobian.nnz()
    }

    /// Compressed jacobian; duplicate entries are summed
    pub fn jacobian_csr(&self) -> CsrMatrix<f64> {
        CsrMatrix::from(&self.jacobian)
    }
}

impl SystemBuilder for GlobalSystem {
    fn add_to_row(&mut self, row: usize, value: f64) {
        self.residual[row] += value;
    }

    fn add_to_matrix_entry(&mut self, row: usize, col: usize, value: f64) {
        if value != 0.0 {
            self.jacobian.push(row, col, value);
        }
    }
}

/// Checks that a cell references three distinct, existing nodes
fn validate_cell(cell: &Cell, idx: usize, num_nodes: usize) -> Result<()> {
    if let Some(missing) = cell.nodes.iter().find(|&&n| n >= num_nodes) {
        return Err(FeldsparError::Mesher(format!(
            "cell {idx} references node {missing}, but the mesh has {num_nodes} nodes"
        )));
    }

    let [n0, n1, n2] = cell.nodes;
    if n0 == n1 || n1 == n2 || n0 == n2 {
        return Err(FeldsparError::DuplicateCellNode { cell: idx });
    }

    Ok(())
}

/// Scatters one cell's local system into the global system
///
/// Rows of Dirichlet nodes are never emitted. Their known displacement times
/// the coupling column of W is moved into the rows of the cell's free nodes.
fn scatter_cell<S: SystemBuilder>(
    nodes: &[Node],
    cell: &Cell,
    dofs: &DofMap,
    load_rule: LoadRule,
    system: &mut S,
) -> Result<()> {
    let cell_nodes = cell.nodes.map(|n| &nodes[n]);
    let local = assemble_local_system(
        cell_nodes.map(|n| &n.vertex),
        cell_nodes.map(|n| &n.body_force),
        &cell.tensor,
        load_rule,
    )?;
    let w = &local.stiffness;
    let equations = cell.nodes.map(|n| dofs.equation(n));

    for k in 0..3 {
        match equations[k] {
            None => {
                let prescribed = &cell_nodes[k].prescribed;

                for j in (0..3).filter(|&j| j != k) {
                    let Some(eq_j) = equations[j] else {
                        continue;
                    };
                    for a in 0..DOF {
                        let row = DOF * j + a;
                        system.add_to_row(
                            eq_j + a,
                            w[(row, DOF * k)] * prescribed.x + w[(row, DOF * k + 1)] * prescribed.y,
                        );
                    }
                }
            }
            Some(eq_k) => {
                for a in 0..DOF {
                    let row = DOF * k + a;
                    let mut internal_force = 0.0;

                    for (i, eq_i) in equations.iter().enumerate() {
                        let Some(eq_i) = eq_i else {
                            continue;
                        };
                        let displacement = &cell_nodes[i].displacement;
                        for b in 0..DOF {
                            let col = DOF * i + b;
                            system.add_to_matrix_entry(eq_k + a, eq_i + b, w[(row, col)]);
                            internal_force += w[(row, col)] * displacement[b];
                        }
                    }

                    system.add_to_row(eq_k + a, internal_force - local.load[row]);
                }
            }
        }
    }

    Ok(())
}

/// Accumulates every cell into the global system
///
/// The caller must clear `system` beforehand. On error the content of
/// `system` is incomplete and must be discarded.
///
/// # Arguments
/// * `nodes` - The vector of nodes
/// * `cells` - The vector of cells
/// * `dofs` - Equation numbering built from the current node kinds
/// * `load_rule` - Body-force integration rule
/// * `system` - The accumulator
pub fn assemble_global_system<S: SystemBuilder>(
    nodes: &[Node],
    cells: &[Cell],
    dofs: &DofMap,
    load_rule: LoadRule,
    system: &mut S,
) -> Result<()> {
    let bar = ProgressBar::new(cells.len() as u64);

    for (idx, cell) in cells.iter().enumerate() {
        validate_cell(cell, idx, nodes.len())?;
        scatter_cell(nodes, cell, dofs, load_rule, system).map_err(|err| err.in_cell(idx))?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    debug!(
        "scattered {} cells into {} equations",
        cells.len(),
        dofs.num_equations()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::{NodeKind, Vertex},
        element::{element_load_vector, element_stiffness_matrix},
        geometry::ElementGeometry,
        material::elastic_tensor,
    };
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, Matrix2, Vector2};

    fn node(x: f64, y: f64, kind: NodeKind) -> Node {
        let mut node = Node::new(Vertex::new(x, y));
        node.kind = kind;
        node
    }

    fn cell(nodes: [usize; 3]) -> Cell {
        let mut cell = Cell::new(nodes);
        cell.tensor = elastic_tensor(3.5e6, 0.3).unwrap();
        cell
    }

    fn assemble(nodes: &[Node], cells: &[Cell]) -> (DofMap, GlobalSystem) {
        let dofs = DofMap::new(nodes);
        let mut system = GlobalSystem::new(dofs.num_equations());
        assemble_global_system(nodes, cells, &dofs, LoadRule::Linear, &mut system).unwrap();
        (dofs, system)
    }

    /// Square with a center node, split into four triangles
    fn fan_mesh() -> (Vec<Node>, Vec<Cell>) {
        let mut nodes = vec![
            node(0.0, 0.0, NodeKind::Dirichlet),
            node(1.0, 0.0, NodeKind::Dirichlet),
            node(1.0, 1.0, NodeKind::Dirichlet),
            node(0.0, 1.0, NodeKind::Dirichlet),
            node(0.5, 0.5, NodeKind::Free),
        ];
        nodes[1].prescribed = Vector2::new(0.01, -0.02);
        nodes[2].prescribed = Vector2::new(0.03, 0.0);
        for n in nodes.iter_mut() {
            n.body_force = Vector2::new(2.0 * n.vertex.x, -1.0);
        }
        let cells = vec![cell([0, 1, 4]), cell([1, 2, 4]), cell([2, 3, 4]), cell([3, 0, 4])];
        (nodes, cells)
    }

    #[test]
    fn free_nodes_are_numbered_in_order() {
        let nodes = vec![
            node(0.0, 0.0, NodeKind::Free),
            node(1.0, 0.0, NodeKind::Dirichlet),
            node(0.0, 1.0, NodeKind::Free),
        ];
        let dofs = DofMap::new(&nodes);

        assert_eq!(dofs.equation(0), Some(0));
        assert_eq!(dofs.equation(1), None);
        assert_eq!(dofs.equation(2), Some(2));
        assert_eq!(dofs.num_equations(), 4);
        assert_eq!(dofs.num_free_nodes(), 2);
    }

    #[test]
    fn condensed_system_matches_substitution() {
        let mut nodes = vec![
            node(0.0, 0.0, NodeKind::Dirichlet),
            node(2.0, 0.5, NodeKind::Free),
            node(0.5, 1.5, NodeKind::Dirichlet),
        ];
        nodes[0].prescribed = Vector2::new(0.002, -0.001);
        nodes[2].prescribed = Vector2::new(-0.003, 0.004);
        nodes[0].body_force = Vector2::new(1e5, 0.0);
        nodes[1].body_force = Vector2::new(2e5, -1e5);
        nodes[2].body_force = Vector2::new(0.0, 3e5);
        let cells = vec![cell([0, 1, 2])];

        // Path 1: assembled residual system
        let (_, system) = assemble(&nodes, &cells);
        let k = DMatrix::from(&system.jacobian_csr());
        assert_eq!(k.shape(), (2, 2));
        let correction = k.clone().lu().solve(system.residual()).unwrap();
        let condensed = -correction;

        // Path 2: full 6x6 system with Dirichlet DOFs substituted by hand
        let vertices = [&nodes[0].vertex, &nodes[1].vertex, &nodes[2].vertex];
        let forces = [&nodes[0].body_force, &nodes[1].body_force, &nodes[2].body_force];
        let geometry = ElementGeometry::new(vertices).unwrap();
        let w = element_stiffness_matrix(&geometry, &cells[0].tensor).unwrap();
        let load = element_load_vector(vertices, forces, LoadRule::Linear);

        let known = [
            nodes[0].prescribed.x,
            nodes[0].prescribed.y,
            nodes[2].prescribed.x,
            nodes[2].prescribed.y,
        ];
        let known_cols = [0, 1, 4, 5];
        let free = [2, 3];

        let k_ff = Matrix2::new(w[(2, 2)], w[(2, 3)], w[(3, 2)], w[(3, 3)]);
        let mut rhs = Vector2::new(load[2], load[3]);
        for (r, &row) in free.iter().enumerate() {
            for (c, &col) in known_cols.iter().enumerate() {
                rhs[r] -= w[(row, col)] * known[c];
            }
        }
        let substituted = k_ff.lu().solve(&rhs).unwrap();

        assert_relative_eq!(k[(0, 0)], k_ff[(0, 0)], max_relative = 1e-12);
        assert_relative_eq!(condensed[0], substituted[0], max_relative = 1e-10);
        assert_relative_eq!(condensed[1], substituted[1], max_relative = 1e-10);
    }

    #[test]
    fn traversal_order_does_not_change_sums() {
        let (nodes, cells) = fan_mesh();
        let (_, forward) = assemble(&nodes, &cells);

        let reversed: Vec<Cell> = cells.iter().rev().cloned().collect();
        let (_, backward) = assemble(&nodes, &reversed);

        let k_forward = DMatrix::from(&forward.jacobian_csr());
        let k_backward = DMatrix::from(&backward.jacobian_csr());

        for (a, b) in k_forward.iter().zip(k_backward.iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        for (a, b) in forward.residual().iter().zip(backward.residual().iter()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn shared_node_accumulates_every_incident_cell() {
        let (nodes, cells) = fan_mesh();
        let (dofs, system) = assemble(&nodes, &cells);
        assert_eq!(dofs.num_equations(), 2);

        let mut expected = 0.0;
        for c in &cells {
            let vertices = c.nodes.map(|n| &nodes[n].vertex);
            let geometry = ElementGeometry::new(vertices).unwrap();
            let w = element_stiffness_matrix(&geometry, &c.tensor).unwrap();
            // center node is local slot 2 in every fan cell
            expected += w[(4, 4)];
        }

        let k = DMatrix::from(&system.jacobian_csr());
        assert_relative_eq!(k[(0, 0)], expected, max_relative = 1e-12);
        assert_relative_eq!(k[(0, 1)], k[(1, 0)], max_relative = 1e-12);
    }

    #[test]
    fn assembled_jacobian_is_symmetric() {
        let (mut nodes, mut cells) = fan_mesh();
        nodes[1].kind = NodeKind::Free;
        nodes[3].kind = NodeKind::Free;
        cells.swap(0, 2);

        let (_, system) = assemble(&nodes, &cells);
        let k = DMatrix::from(&system.jacobian_csr());
        assert_eq!(k.nrows(), 6);
        assert!((&k - k.transpose()).amax() <= 1e-10 * k.amax());
    }

    #[test]
    fn clear_resets_accumulators() {
        let (nodes, cells) = fan_mesh();
        let (dofs, mut system) = assemble(&nodes, &cells);
        assert!(system.num_contributions() > 0);

        system.clear();
        assert_eq!(system.num_contributions(), 0);
        assert!(system.residual().iter().all(|&r| r == 0.0));
        assert_eq!(system.size(), dofs.num_equations());
    }

    #[test]
    fn duplicate_node_aborts_assembly() {
        let (nodes, mut cells) = fan_mesh();
        cells.push(cell([0, 4, 4]));

        let dofs = DofMap::new(&nodes);
        let mut system = GlobalSystem::new(dofs.num_equations());
        let err = assemble_global_system(&nodes, &cells, &dofs, LoadRule::Linear, &mut system)
            .unwrap_err();
        assert!(matches!(err, FeldsparError::DuplicateCellNode { cell: 4 }));
    }

    #[test]
    fn degenerate_cell_reports_its_index() {
        let (mut nodes, mut cells) = fan_mesh();
        nodes.push(node(2.0, 2.0, NodeKind::Dirichlet));
        cells.insert(1, cell([0, 2, 5]));

        let dofs = DofMap::new(&nodes);
        let mut system = GlobalSystem::new(dofs.num_equations());
        let err = assemble_global_system(&nodes, &cells, &dofs, LoadRule::Linear, &mut system)
            .unwrap_err();

        match err {
            FeldsparError::Cell { cell, source } => {
                assert_eq!(cell, 1);
                assert!(matches!(*source, FeldsparError::DegenerateElement { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
