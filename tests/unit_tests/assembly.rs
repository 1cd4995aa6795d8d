use super::strip_topology;
use joule::assembly::global::{CsrAssembler, EliminatedSystem};
use joule::assembly::local::{EdgeSystemAssembler, NodalStiffnessAssembler};
use joule::assembly::{
    cell_edge_incidence, gradient_matrix, inverse_normal_edge_weights, lumped_edge_mass, tangential_edge_weights,
};
use joule::material::PropertyValue;
use joule::nalgebra::{DMatrix, DVector, Matrix2};
use joule::nalgebra_sparse::CsrMatrix;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};

#[test]
fn square_cells_have_half_weights() {
    let topology = strip_topology(1.0, 2, 2);
    let sigma = vec![PropertyValue::Scalar(3.0); topology.num_cells()];
    for weights in tangential_edge_weights(&topology, &sigma) {
        for w in weights {
            assert_scalar_eq!(w, 1.5, comp = abs, tol = 1e-12);
        }
    }

    let k = vec![PropertyValue::Scalar(4.0); topology.num_cells()];
    for weights in inverse_normal_edge_weights(&topology, &k) {
        for w in weights {
            assert_scalar_eq!(w, 0.125, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn anisotropic_weights_use_edge_directions() {
    let topology = strip_topology(1.0, 1, 1);
    let sigma = vec![PropertyValue::Tensor(Matrix2::new(2.0, 0.0, 0.0, 6.0))];
    let weights = tangential_edge_weights(&topology, &sigma);
    for (local, &e) in topology.cell_edges(0).iter().enumerate() {
        let horizontal = topology.edge_tangent(e).x.abs() > 0.5;
        let expected = if horizontal { 1.0 } else { 3.0 };
        assert_scalar_eq!(weights[0][local], expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn lumped_mass_sums_shared_edges() {
    let topology = strip_topology(1.0, 2, 1);
    let weights = vec![[1.0; 4]; topology.num_cells()];
    let mass = lumped_edge_mass(&topology, &weights);
    for e in 0..topology.num_edges() {
        let expected = if topology.boundary_edge(e).is_some() { 1.0 } else { 2.0 };
        assert_eq!(mass[e], expected);
    }
}

#[test]
fn nodal_stiffness_equals_weighted_gradient_product() {
    let topology = strip_topology(2.0, 3, 2);
    let sigma = vec![PropertyValue::Scalar(2.0); topology.num_cells()];
    let weights = tangential_edge_weights(&topology, &sigma);

    let assembled = CsrAssembler::default()
        .assemble(&NodalStiffnessAssembler::new(&topology, &weights))
        .unwrap();

    let g = DMatrix::from(&gradient_matrix(&topology));
    let m = DMatrix::from_diagonal(&lumped_edge_mass(&topology, &weights));
    let expected = g.transpose() * m * g;
    assert_matrix_eq!(DMatrix::from(&assembled), expected, comp = abs, tol = 1e-12);
}

#[test]
fn edge_system_equals_mass_plus_weighted_incidence_product() {
    let topology = strip_topology(2.0, 3, 2);
    let edge_weights: Vec<[f64; 4]> = (0..topology.num_cells())
        .map(|k| [1.0 + k as f64, 0.5, 2.0, 0.25])
        .collect();
    let cell_weights: Vec<f64> = (0..topology.num_cells()).map(|k| 0.1 * (k + 1) as f64).collect();

    let assembled = CsrAssembler::default()
        .assemble(&EdgeSystemAssembler::new(&topology, &edge_weights, &cell_weights))
        .unwrap();

    let d = DMatrix::from(&cell_edge_incidence(&topology));
    let m = DMatrix::from_diagonal(&lumped_edge_mass(&topology, &edge_weights));
    let c = DMatrix::from_diagonal(&DVector::from_vec(cell_weights));
    let expected = m + d.transpose() * c * d;
    assert_matrix_eq!(DMatrix::from(&assembled), expected, comp = abs, tol = 1e-12);
}

#[test]
fn assembler_can_be_reused() {
    let topology = strip_topology(1.0, 2, 2);
    let weights = vec![[1.0; 4]; topology.num_cells()];
    let assembler = CsrAssembler::default();
    let element_assembler = NodalStiffnessAssembler::new(&topology, &weights);
    let first = assembler.assemble(&element_assembler).unwrap();
    let second = assembler.assemble(&element_assembler).unwrap();
    assert_eq!(first, second);
}

/// Tridiagonal matrix with a decoupled zero row and column at index 2.
fn matrix_with_inactive_dof() -> CsrMatrix<f64> {
    #[rustfmt::skip]
    let dense = DMatrix::from_row_slice(5, 5, &[
         2.0, -1.0, 0.0,  0.0,  0.0,
        -1.0,  2.0, 0.0, -1.0,  0.0,
         0.0,  0.0, 0.0,  0.0,  0.0,
         0.0, -1.0, 0.0,  2.0, -1.0,
         0.0,  0.0, 0.0, -1.0,  2.0,
    ]);
    CsrMatrix::from(&dense)
}

#[test]
fn elimination_splits_essential_inactive_and_active_dofs() {
    let system = EliminatedSystem::new(&matrix_with_inactive_dof(), &[0, 4]);
    assert_eq!(system.num_dofs(), 5);
    assert_eq!(system.essential_dofs(), &[0, 4]);
    assert_eq!(system.inactive_dofs(), &[2]);
    assert_eq!(system.active_dofs(), &[1, 3]);

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2, &[
         2.0, -1.0,
        -1.0,  2.0,
    ]);
    assert_matrix_eq!(DMatrix::from(&**system.matrix()), expected);
}

#[test]
fn elimination_moves_essential_values_to_the_right_hand_side() {
    let system = EliminatedSystem::new(&matrix_with_inactive_dof(), &[0, 4]);
    let rhs = DVector::from_vec(vec![10.0, 1.0, 0.0, 2.0, 20.0]);
    let essential = DVector::from_vec(vec![3.0, 5.0]);

    let reduced = system.reduced_rhs((&rhs).into(), &essential);
    assert_matrix_eq!(reduced, DVector::from_vec(vec![4.0, 7.0]));

    let mut full = DVector::from_element(5, -1.0);
    system.expand_into(&DVector::from_vec(vec![6.0, 7.0]), &essential, (&mut full).into());
    assert_matrix_eq!(full, DVector::from_vec(vec![3.0, 6.0, 0.0, 7.0, 5.0]));
    assert_matrix_eq!(
        system.restrict((&full).into()),
        DVector::from_vec(vec![6.0, 7.0])
    );
}
