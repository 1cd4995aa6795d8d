use crate::mesh::QuadMesh2d;
use crate::state::Field;
use crate::transient::{OutputSink, Snapshot};
use eyre::eyre;
use nalgebra::Vector2;
use std::convert::TryInto;
use std::path::{Path, PathBuf};
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataArrayBase, DataSet, ElementType, IOBuffer, Piece,
    UnstructuredGridPiece, Version, VertexNumbers, Vtk,
};

pub struct QuadMesh2dDataSetBuilder<'a> {
    mesh: &'a QuadMesh2d,
    // Only used for exporting directly to file
    title: Option<String>,
    attributes: Attributes,
}

impl<'a> QuadMesh2dDataSetBuilder<'a> {
    pub fn from_mesh(mesh: &'a QuadMesh2d) -> Self {
        Self {
            mesh,
            title: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..self
        }
    }

    /// Adds one scalar per mesh vertex.
    pub fn with_point_scalar_attributes(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.attributes.point.push(scalar_attribute(name, values));
        self
    }

    /// Adds one scalar per cell.
    pub fn with_cell_scalar_attributes(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.attributes.cell.push(scalar_attribute(name, values));
        self
    }

    /// Adds one in-plane vector per cell.
    pub fn with_cell_vector_attributes(mut self, name: impl Into<String>, values: &[Vector2<f64>]) -> Self {
        let data: Vec<f64> = values.iter().flat_map(|v| [v.x, v.y, 0.0]).collect();
        self.attributes.cell.push(Attribute::DataArray(DataArrayBase {
            name: name.into(),
            elem: ElementType::Vectors,
            data: IOBuffer::new(data),
        }));
        self
    }

    pub fn try_build(&self) -> eyre::Result<DataSet> {
        let num_vertices = self.mesh.num_vertices();
        let num_cells = self.mesh.num_cells();
        for attribute in &self.attributes.point {
            check_attribute_len(attribute, num_vertices, 1)?;
        }
        for attribute in &self.attributes.cell {
            let components = match attribute {
                Attribute::DataArray(DataArrayBase {
                    elem: ElementType::Vectors,
                    ..
                }) => 3,
                _ => 1,
            };
            check_attribute_len(attribute, num_cells, components)?;
        }

        let points: Vec<f64> = self
            .mesh
            .vertices()
            .iter()
            .flat_map(|v| [v.x, v.y, 0.0])
            .collect();

        // Vertices is laid out as follows: N, i_1, i_2, ... i_N,
        // so for quads this becomes 4 followed by the four indices making up the quad
        let mut vertices: Vec<u32> = Vec::with_capacity(5 * num_cells);
        for cell in self.mesh.connectivity() {
            let indices = cell.vertex_indices();
            vertices.push(indices.len().try_into()?);
            for &idx in indices {
                vertices.push(idx.try_into()?);
            }
        }

        let piece = UnstructuredGridPiece {
            points: points.into(),
            cells: Cells {
                cell_verts: VertexNumbers::Legacy {
                    num_cells: num_cells.try_into()?,
                    vertices,
                },
                types: vec![CellType::Quad; num_cells],
            },
            data: self.attributes.clone(),
        };

        Ok(DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(piece))],
        })
    }

    /// Convenience function for directly exporting the dataset to a file.
    pub fn try_export(&self, filename: impl AsRef<Path>) -> eyre::Result<()> {
        let filepath = filename.as_ref();
        let fallback_title = filepath
            .file_stem()
            .map(|os_str| os_str.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let dataset = self.try_build()?;
        Vtk {
            version: Version { major: 4, minor: 1 },
            // If we don't have a title then just make the filepath the title
            title: self.title.clone().unwrap_or(fallback_title),
            byte_order: ByteOrder::BigEndian,
            data: dataset,
            file_path: None,
        }
        .export(filepath)
        .map_err(|err| eyre!("failed to export {}: {}", filepath.display(), err))?;
        Ok(())
    }
}

fn scalar_attribute(name: impl Into<String>, values: Vec<f64>) -> Attribute {
    Attribute::DataArray(DataArrayBase {
        name: name.into(),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        data: IOBuffer::new(values),
    })
}

fn check_attribute_len(attribute: &Attribute, entities: usize, components: usize) -> eyre::Result<()> {
    if let Attribute::DataArray(array) = attribute {
        if array.data.len() != entities * components {
            return Err(eyre!(
                "attribute \"{}\" has {} values, expected {}",
                array.name,
                array.data.len(),
                entities * components
            ));
        }
    }
    Ok(())
}

/// Writes every snapshot of a simulation to a legacy VTK file.
///
/// Files are named `{prefix}_{cycle}.vtk` inside the output directory. The potential is
/// written per vertex, temperature, magnetic flux and heating per cell, and the electric
/// field and thermal flux as reconstructed cell vectors.
#[derive(Debug, Clone)]
pub struct VtkSink {
    directory: PathBuf,
    prefix: String,
    written: Vec<PathBuf>,
}

impl VtkSink {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            written: Vec::new(),
        }
    }

    /// Paths of all files written so far.
    pub fn written_files(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn file_path(&self, cycle: usize) -> PathBuf {
        self.directory
            .join(format!("{}_{:05}.vtk", self.prefix, cycle))
    }
}

impl OutputSink for VtkSink {
    fn write(&mut self, snapshot: &Snapshot) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let state = snapshot.state;
        let cell_vectors = |field: Field| {
            snapshot
                .operator
                .space(field)
                .reconstruct_cell_vectors(state.view(field))
        };

        let builder = QuadMesh2dDataSetBuilder::from_mesh(snapshot.mesh)
            .with_title(format!("{} t = {}", self.prefix, snapshot.time))
            .with_point_scalar_attributes(Field::Potential.name(), state.view(Field::Potential).iter().copied().collect())
            .with_cell_scalar_attributes(
                Field::Temperature.name(),
                state.view(Field::Temperature).iter().copied().collect(),
            )
            .with_cell_scalar_attributes(
                Field::MagneticFlux.name(),
                state.view(Field::MagneticFlux).iter().copied().collect(),
            )
            .with_cell_scalar_attributes(
                Field::DerivedHeating.name(),
                state.view(Field::DerivedHeating).iter().copied().collect(),
            )
            .with_cell_vector_attributes(Field::ElectricField.name(), &cell_vectors(Field::ElectricField))
            .with_cell_vector_attributes(Field::ThermalFlux.name(), &cell_vectors(Field::ThermalFlux));

        let path = self.file_path(snapshot.cycle);
        builder.try_export(&path)?;
        log::debug!("Wrote snapshot of cycle {} to {}", snapshot.cycle, path.display());
        self.written.push(path);
        Ok(())
    }
}
