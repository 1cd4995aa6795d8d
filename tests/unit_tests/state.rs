use joule::error::{ConfigurationError, Error};
use joule::nalgebra::DVector;
use joule::state::{compute_offsets, BlockLayout, BlockState, Field};
use proptest::collection::vec;
use proptest::prelude::*;

fn layout() -> BlockLayout {
    BlockLayout::new([(Field::Temperature, 2), (Field::Potential, 3), (Field::ElectricField, 1)]).unwrap()
}

#[test]
fn offsets_are_cumulative() {
    assert_eq!(compute_offsets(&[]), vec![0]);
    assert_eq!(compute_offsets(&[2, 0, 3]), vec![0, 2, 2, 5]);
}

#[test]
fn layout_ranges_follow_insertion_order() {
    let layout = layout();
    assert_eq!(layout.num_blocks(), 3);
    assert_eq!(layout.total_size(), 6);
    assert_eq!(layout.offsets(), &[0, 2, 5, 6]);
    assert_eq!(layout.range(Field::Potential), Some(2..5));
    assert_eq!(layout.size(Field::ElectricField), Some(1));
    assert_eq!(layout.range(Field::MagneticFlux), None);
    assert!(!layout.contains(Field::DerivedHeating));
}

#[test]
fn layout_rejects_duplicate_fields() {
    let result = BlockLayout::new([(Field::Temperature, 2), (Field::Temperature, 3)]);
    assert_eq!(result, Err(ConfigurationError::DuplicateField(Field::Temperature)));
}

#[test]
fn views_alias_the_shared_buffer() {
    let mut state = BlockState::zeros(layout());
    state.view_mut(Field::Potential).fill(2.0);
    state.view_mut(Field::ElectricField)[0] = -1.0;

    assert_eq!(state.as_vector().as_slice(), &[0.0, 0.0, 2.0, 2.0, 2.0, -1.0]);
    assert_eq!(state.view(Field::Potential).iter().sum::<f64>(), 6.0);

    state.as_vector_mut()[0] = 5.0;
    assert_eq!(state.view(Field::Temperature)[0], 5.0);
}

#[test]
fn from_vector_checks_total_size() {
    let result = BlockState::from_vector(layout(), DVector::zeros(5));
    assert!(matches!(result, Err(Error::StateLayoutMismatch { .. })));

    let state = BlockState::from_vector(layout(), DVector::from_element(6, 1.0)).unwrap();
    assert_eq!(state.len(), 6);
}

#[test]
fn check_layout_reports_block_sizes() {
    let state = BlockState::zeros(layout());
    assert!(state.check_layout(&[2, 3, 1]).is_ok());
    match state.check_layout(&[2, 3, 2]) {
        Err(Error::StateLayoutMismatch { expected, actual }) => {
            assert_eq!(expected, vec![2, 3, 2]);
            assert_eq!(actual, vec![2, 3, 1]);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn vector_updates() {
    let x = BlockState::from_vector(layout(), DVector::from_element(6, 1.0)).unwrap();
    let y = BlockState::from_vector(layout(), DVector::from_fn(6, |i, _| i as f64)).unwrap();

    let mut z = BlockState::zeros(layout());
    z.assign_sum(&x, 2.0, &y);
    assert_eq!(z.as_vector().as_slice(), &[1.0, 3.0, 5.0, 7.0, 9.0, 11.0]);

    z.axpy(-1.0, &x);
    assert_eq!(z.as_vector().as_slice(), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);

    z.copy_from(&x);
    assert_eq!(z, x);
}

proptest! {
    #[test]
    fn layouts_partition_the_buffer(
        fields in Just(Field::ALL.to_vec()).prop_shuffle(),
        sizes in vec(0..40usize, 6),
        num_blocks in 0..=6usize,
    ) {
        let blocks: Vec<(Field, usize)> = fields.iter().copied().zip(sizes.iter().copied()).take(num_blocks).collect();
        let block_sizes = &sizes[..num_blocks];
        let layout = BlockLayout::new(blocks.clone()).unwrap();

        let offsets = compute_offsets(block_sizes);
        prop_assert_eq!(offsets.len(), num_blocks + 1);
        prop_assert_eq!(layout.offsets(), offsets.as_slice());
        prop_assert_eq!(layout.total_size(), block_sizes.iter().sum::<usize>());
        prop_assert_eq!(layout.sizes(), block_sizes.to_vec());

        // Ranges follow each other and tile the buffer without overlap
        let mut coverage = vec![0usize; layout.total_size()];
        let mut end = 0;
        for &(field, size) in &blocks {
            let range = layout.range(field).unwrap();
            prop_assert_eq!(range.start, end);
            prop_assert_eq!(range.len(), size);
            end = range.end;
            for i in range {
                coverage[i] += 1;
            }
        }
        prop_assert_eq!(end, layout.total_size());
        prop_assert!(coverage.iter().all(|&count| count == 1));
        for &field in &fields[num_blocks..] {
            prop_assert!(!layout.contains(field));
        }

        // Writes through one view stay inside its range
        let mut state = BlockState::zeros(layout.clone());
        for (index, &(field, _)) in blocks.iter().enumerate() {
            state.view_mut(field).fill(index as f64 + 1.0);
        }
        for (index, &(field, _)) in blocks.iter().enumerate() {
            let range = layout.range(field).unwrap();
            let value = index as f64 + 1.0;
            prop_assert!(state.as_vector().rows_range(range).iter().all(|&v| v == value));
        }
    }
}
