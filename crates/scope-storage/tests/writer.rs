//! End-to-end tests of the acquisition writer on a temporary directory.

use scope_core::data::Frame;
use scope_storage::{
    AcquisitionWriter, CoordinateRow, CoordinatesLog, ExperimentLayout, ImageKey, TileIndex,
};
use tempfile::TempDir;

fn row(i: u32, j: u32, k: u32) -> CoordinateRow {
    CoordinateRow {
        region: "0".into(),
        i,
        j,
        k,
        x_mm: j as f64 * 0.9,
        y_mm: i as f64 * 0.9,
        z_um: 1000.0,
        time: "t".into(),
    }
}

#[test]
fn writes_images_coordinates_and_tiles() {
    let dir = TempDir::new().unwrap();
    let layout = ExperimentLayout::new(dir.path(), "exp_1");
    let mut writer = AcquisitionWriter::create(layout.clone()).unwrap();

    writer.begin_time_point(0).unwrap();
    let frame = Frame::from_u16(4, 4, &[512; 16]);
    for (i, j) in [(0, 0), (0, 1)] {
        let key = ImageKey {
            time_point: 0,
            region: "0",
            i,
            j,
            k: 0,
            channel: "BF",
        };
        let path = writer.save_image(&key, &frame, (j as f64, i as f64, 0.0)).unwrap();
        assert!(path.exists());
        writer.append_coordinate(row(i, j, 0));
    }
    writer.flush_time_point().unwrap();
    writer.finish().unwrap();

    assert!(dir.path().join("exp_1/0/0_0_1_0_BF.tiff").exists());
    let coords = CoordinatesLog::read_csv(&layout.coordinates_path(0)).unwrap();
    assert_eq!(coords.len(), 2);

    let tiles = TileIndex::read_json(&layout.tiles_path()).unwrap();
    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles.tiles[1].path, std::path::PathBuf::from("0/0_0_1_0_BF.tiff"));
    assert_eq!(writer.images_written(), 2);
}

#[test]
fn new_time_point_resets_coordinates() {
    let dir = TempDir::new().unwrap();
    let mut writer = AcquisitionWriter::create(ExperimentLayout::new(dir.path(), "exp")).unwrap();
    writer.begin_time_point(0).unwrap();
    writer.append_coordinate(row(0, 0, 0));
    writer.flush_time_point().unwrap();

    writer.begin_time_point(1).unwrap();
    assert!(writer.coordinates().is_empty());
    writer.flush_time_point().unwrap();

    let layout = writer.layout().clone();
    assert_eq!(CoordinatesLog::read_csv(&layout.coordinates_path(0)).unwrap().len(), 1);
    assert!(CoordinatesLog::read_csv(&layout.coordinates_path(1)).unwrap().is_empty());
}
