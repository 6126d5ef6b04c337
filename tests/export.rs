use std::collections::HashMap;

use indexmap::IndexMap;
use ndarray::{Array3, s};
use segment_volume::{
    Color, ColorSource, Colormap, Encoding, ExportError, Geometry, Mask, NrrdImage, PackError,
    SegmentationExporter, export, read_segments,
};
use tempfile::tempdir;

const SHAPE: (usize, usize, usize) = (4, 5, 6);

fn block(z: std::ops::Range<usize>, y: std::ops::Range<usize>) -> Mask {
    let mut data = Array3::<u8>::zeros(SHAPE);
    data.slice_mut(s![z, y, ..]).fill(1);
    Mask::from(data)
}

fn geometry() -> Geometry {
    Geometry::new(
        [0.9765625, 0.9765625, 3.0],
        [-250.0, -250.0, -120.5],
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    )
}

#[test]
fn overlapping_and_disjoint_structures() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("structures.seg.nrrd");

    let mut masks = IndexMap::new();
    masks.insert("A".to_string(), block(0..2, 0..5));
    masks.insert("B".to_string(), block(0..2, 0..5));
    masks.insert("C".to_string(), block(3..4, 0..5).with_geometry(geometry()));

    let segments = export(&masks, &path, &ColorSource::default()).unwrap();
    let placed: Vec<_> = segments
        .iter()
        .map(|s| (s.record.name.as_str(), s.record.layer, s.record.label_value))
        .collect();
    assert_eq!(placed, vec![("A", 0, 1), ("B", 1, 1), ("C", 0, 2)]);

    let image = NrrdImage::read(&path).unwrap();
    assert_eq!(image.data.dim(), (4, 5, 6, 2));
    assert_eq!(image.geometry, geometry());
    assert_eq!(image.key_value("Segment0_Extent").unwrap(), "0 5 0 4 0 3");
    assert_eq!(read_segments(&image).unwrap(), segments);
}

#[test]
fn written_layers_reproduce_every_mask() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("round_trip.seg.nrrd");

    let masks = [
        ("Body", block(0..4, 0..4)),
        ("Heart", block(1..3, 1..3)),
        ("Lung_L", block(1..3, 3..4)),
        ("Lung_R", block(0..1, 4..5)),
        ("Lesion", block(1..2, 1..2)),
    ];
    let written = SegmentationExporter::new(ColorSource::from(Colormap::Jet))
        .with_encoding(Encoding::Raw)
        .export(masks.iter().map(|(name, mask)| (*name, mask)), &path)
        .unwrap();
    let placed: Vec<_> = written
        .iter()
        .map(|s| (s.record.layer, s.record.label_value))
        .collect();
    assert_eq!(placed, vec![(0, 1), (1, 1), (1, 2), (0, 2), (2, 1)]);

    let image = NrrdImage::read(&path).unwrap();
    assert_eq!(image.data.dim().3, 3);
    let segments = read_segments(&image).unwrap();
    assert_eq!(segments, written);

    for (segment, (name, mask)) in segments.iter().zip(&masks) {
        assert_eq!(segment.record.name, *name);
        let layer = image.data.slice(s![.., .., .., segment.record.layer]);
        let decoded = layer.mapv(|value| value == segment.record.label_value);
        assert_eq!(decoded, mask.foreground().unwrap(), "{name}");
    }
}

#[test]
fn skipped_masks_do_not_consume_indices() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("skipped.seg.nrrd");

    let mut labels = Array3::<u8>::zeros(SHAPE);
    labels[[0, 0, 0]] = 1;
    labels[[1, 1, 1]] = 2;
    let masks = [
        ("Labels", Mask::from(labels)),
        ("Heart", block(0..1, 0..1)),
        ("Empty", Mask::from(Array3::<u8>::zeros(SHAPE))),
        ("Liver", block(2..3, 0..1)),
    ];
    export(masks.iter().map(|(n, m)| (*n, m)), &path, &ColorSource::default()).unwrap();

    let image = NrrdImage::read(&path).unwrap();
    let names: Vec<_> = read_segments(&image)
        .unwrap()
        .into_iter()
        .map(|s| s.record.name)
        .collect();
    assert_eq!(names, vec!["Heart", "Liver"]);
    assert_eq!(image.data.dim().3, 1);
}

#[test]
fn nothing_to_write_leaves_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.seg.nrrd");

    let empty = Mask::from(Array3::<u8>::zeros(SHAPE));
    let error = export([("Empty", &empty)], &path, &ColorSource::default()).unwrap_err();

    assert!(matches!(error, ExportError::Pack(PackError::NoStructures)));
    assert!(!path.exists());
}

#[test]
fn missing_explicit_color_leaves_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("colors.seg.nrrd");

    let colors = HashMap::from([("Heart".to_string(), Color::rgb(1.0, 0.0, 0.0))]);
    let heart = block(0..1, 0..1);
    let liver = block(2..3, 0..1);
    let error = export(
        [("Heart", &heart), ("Liver", &liver)],
        &path,
        &ColorSource::Explicit(colors),
    )
    .unwrap_err();

    assert!(error.is_lookup_error());
    assert!(!path.exists());
}

#[test]
fn colors_are_stable_between_exports() {
    let dir = tempdir().unwrap();
    let heart = block(0..1, 0..1);

    let mut written = Vec::new();
    for file in ["first.seg.nrrd", "second.seg.nrrd"] {
        let path = dir.path().join(file);
        export([("Heart", &heart)], &path, &ColorSource::default()).unwrap();
        let image = NrrdImage::read(&path).unwrap();
        written.push(image.key_value("Segment0_Color").unwrap().to_string());
    }
    assert_eq!(written[0], written[1]);
}
