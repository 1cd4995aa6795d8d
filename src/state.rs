//! Block-structured state vectors.
//!
//! A [`BlockState`] holds every field of the coupled problem in a single contiguous buffer.
//! The [`BlockLayout`] describes which field occupies which range of the buffer. Views into
//! the individual fields alias the shared buffer, so that in-place updates by the operator
//! and the time integrators are visible through every view.
use crate::error::{ConfigurationError, Error};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// The physical fields making up the coupled state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Temperature,
    ThermalFlux,
    Potential,
    ElectricField,
    MagneticFlux,
    DerivedHeating,
}

impl Field {
    /// All fields in their canonical block order.
    pub const ALL: [Field; 6] = [
        Field::Temperature,
        Field::ThermalFlux,
        Field::Potential,
        Field::ElectricField,
        Field::MagneticFlux,
        Field::DerivedHeating,
    ];

    /// Short name used for output.
    pub fn name(&self) -> &'static str {
        match self {
            Field::Temperature => "T",
            Field::ThermalFlux => "F",
            Field::Potential => "Phi",
            Field::ElectricField => "E",
            Field::MagneticFlux => "B",
            Field::DerivedHeating => "w",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Temperature => "temperature",
            Field::ThermalFlux => "thermal flux",
            Field::Potential => "electric potential",
            Field::ElectricField => "electric field",
            Field::MagneticFlux => "magnetic flux",
            Field::DerivedHeating => "Joule heating",
        };
        write!(f, "{}", name)
    }
}

/// Computes cumulative offsets for the given block sizes.
///
/// The result has one more entry than `sizes`: `offsets[0] = 0`,
/// `offsets[i + 1] = offsets[i] + sizes[i]`, and the last entry is the total size.
pub fn compute_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len() + 1);
    offsets.push(0);
    let mut total = 0;
    for size in sizes {
        total += size;
        offsets.push(total);
    }
    offsets
}

/// Ordered fields together with the offset range each of them occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    fields: Vec<Field>,
    offsets: Vec<usize>,
}

impl BlockLayout {
    pub fn new(fields_and_sizes: impl IntoIterator<Item = (Field, usize)>) -> Result<Self, ConfigurationError> {
        let mut fields = Vec::new();
        let mut sizes = Vec::new();
        for (field, size) in fields_and_sizes {
            if fields.contains(&field) {
                return Err(ConfigurationError::DuplicateField(field));
            }
            fields.push(field);
            sizes.push(size);
        }
        let offsets = compute_offsets(&sizes);
        Ok(Self { fields, offsets })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn num_blocks(&self) -> usize {
        self.fields.len()
    }

    pub fn total_size(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn index_of(&self, field: Field) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.index_of(field).is_some()
    }

    /// The half-open range `[offsets[i], offsets[i + 1])` of the given field.
    pub fn range(&self, field: Field) -> Option<Range<usize>> {
        self.index_of(field)
            .map(|i| self.offsets[i]..self.offsets[i + 1])
    }

    pub fn size(&self, field: Field) -> Option<usize> {
        self.range(field).map(|r| r.len())
    }

    /// Checks that the block sizes agree with the given sizes.
    pub fn check_sizes(&self, sizes: &[usize]) -> Result<(), Error> {
        let actual = self.sizes();
        if actual.as_slice() != sizes {
            Err(Error::StateLayoutMismatch {
                expected: sizes.to_vec(),
                actual,
            })
        } else {
            Ok(())
        }
    }

    fn expect_range(&self, field: Field) -> Range<usize> {
        match self.range(field) {
            Some(range) => range,
            None => panic!("Field {} is not part of the block layout.", field),
        }
    }
}

/// A single contiguous buffer partitioned into named, non-overlapping field blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockState {
    layout: BlockLayout,
    buffer: DVector<f64>,
}

impl BlockState {
    pub fn zeros(layout: BlockLayout) -> Self {
        let buffer = DVector::zeros(layout.total_size());
        Self { layout, buffer }
    }

    pub fn from_vector(layout: BlockLayout, buffer: DVector<f64>) -> Result<Self, Error> {
        if buffer.len() != layout.total_size() {
            return Err(Error::StateLayoutMismatch {
                expected: layout.sizes(),
                actual: vec![buffer.len()],
            });
        }
        Ok(Self { layout, buffer })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.buffer
    }

    pub fn as_vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.buffer
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Immutable view of a single field.
    ///
    /// # Panics
    ///
    /// Panics if the field is not part of the layout.
    pub fn view(&self, field: Field) -> DVectorView<f64> {
        let range = self.layout.expect_range(field);
        self.buffer.rows(range.start, range.len())
    }

    /// Mutable view of a single field, aliasing the shared buffer.
    ///
    /// # Panics
    ///
    /// Panics if the field is not part of the layout.
    pub fn view_mut(&mut self, field: Field) -> DVectorViewMut<f64> {
        let range = self.layout.expect_range(field);
        self.buffer.rows_mut(range.start, range.len())
    }

    pub fn fill(&mut self, value: f64) {
        self.buffer.fill(value);
    }

    /// Copies the contents of `other`, which must have the same layout.
    pub fn copy_from(&mut self, other: &BlockState) {
        assert_eq!(self.layout, other.layout, "Block layouts must agree.");
        self.buffer.copy_from(&other.buffer);
    }

    /// `self <- self + alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &BlockState) {
        assert_eq!(self.layout, x.layout, "Block layouts must agree.");
        self.buffer.axpy(alpha, &x.buffer, 1.0);
    }

    /// `self <- x + alpha * y`
    pub fn assign_sum(&mut self, x: &BlockState, alpha: f64, y: &BlockState) {
        self.copy_from(x);
        self.axpy(alpha, y);
    }

    /// Checks that the block sizes agree with the given sizes.
    pub fn check_layout(&self, sizes: &[usize]) -> Result<(), Error> {
        self.layout.check_sizes(sizes)
    }
}
