use super::{data_output_path, driven_conductor};
use joule::io::vtk::{QuadMesh2dDataSetBuilder, VtkSink};
use joule::mesh::procedural::create_rectangle_quad_mesh_2d;
use joule::nalgebra::{Point2, Vector2};
use joule::ode::OdeSchemeKind;
use joule::transient::{ExecutionSettings, OutputSink, Snapshot};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Shares the paths written by a [`VtkSink`] with the test after the sink has been moved into
/// the loop.
struct SharedVtkSink {
    sink: VtkSink,
    written: Rc<RefCell<Vec<PathBuf>>>,
}

impl OutputSink for SharedVtkSink {
    fn write(&mut self, snapshot: &Snapshot) -> eyre::Result<()> {
        self.sink.write(snapshot)?;
        *self.written.borrow_mut() = self.sink.written_files().to_vec();
        Ok(())
    }
}

#[test]
fn vtk_sink_writes_every_snapshot() {
    let directory = data_output_path().join("vtk_sink_writes_every_snapshot");
    let _ = std::fs::remove_dir_all(&directory);

    let sink = VtkSink::new(&directory, "conductor");
    let expected_first = sink.file_path(0);
    let expected_last = sink.file_path(3);
    let written = Rc::new(RefCell::new(Vec::new()));
    let settings = ExecutionSettings {
        t_initial: 0.0,
        t_final: 0.75,
        dt: 0.25,
        output_every: 1,
        debug: false,
    };
    let mut simulation = driven_conductor(OdeSchemeKind::BackwardEuler, settings).with_sink(Box::new(SharedVtkSink {
        sink,
        written: Rc::clone(&written),
    }));
    simulation.run().unwrap();

    let written = written.borrow();
    assert_eq!(written.len(), 4);
    assert_eq!(written.first(), Some(&expected_first));
    assert_eq!(written.last(), Some(&expected_last));
    assert!(written.iter().all(|path| path.exists()));

    // Legacy files keep their keywords in plain text even when the data is binary
    let contents = std::fs::read(&expected_last).unwrap();
    let contains = |needle: &str| contents.windows(needle.len()).any(|w| w == needle.as_bytes());
    assert!(contents.starts_with(b"# vtk DataFile Version"));
    assert!(contains("conductor t = 0.75"));
    assert!(contains("POINT_DATA 45"));
    assert!(contains("CELL_DATA 32"));
    for name in ["Phi", "T", "B", "w", "E", "F"] {
        assert!(contains(&format!(" {} ", name)), "missing attribute {}", name);
    }
}

#[test]
fn builder_rejects_attributes_of_wrong_length() {
    let mesh = create_rectangle_quad_mesh_2d(&Point2::origin(), 1.0, 1.0, 2, 2);
    assert_eq!(mesh.num_vertices(), 9);
    assert_eq!(mesh.num_cells(), 4);

    let valid = QuadMesh2dDataSetBuilder::from_mesh(&mesh)
        .with_point_scalar_attributes("p", vec![0.0; 9])
        .with_cell_scalar_attributes("c", vec![0.0; 4])
        .with_cell_vector_attributes("v", &[Vector2::new(1.0, 0.0); 4]);
    assert!(valid.try_build().is_ok());

    let wrong_points = QuadMesh2dDataSetBuilder::from_mesh(&mesh).with_point_scalar_attributes("p", vec![0.0; 4]);
    assert!(wrong_points.try_build().is_err());

    let wrong_vectors =
        QuadMesh2dDataSetBuilder::from_mesh(&mesh).with_cell_vector_attributes("v", &[Vector2::new(1.0, 0.0); 3]);
    assert!(wrong_vectors.try_build().is_err());
}
