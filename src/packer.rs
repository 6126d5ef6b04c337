use crate::volume::{Geometry, Mask};

use log::debug;
use ndarray::{Array3, Array4, ArrayView3, Zip, s};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("Structure name `{0}` appears more than once")]
    DuplicateName(String),

    #[error("Mask `{name}` has shape {found:?} but earlier masks have shape {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("No binary masks to pack")]
    NoStructures,
}

/// Where a structure ended up in the packed volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentRecord {
    pub name: String,
    /// Voxel value of the structure inside its layer, starting at 1
    pub label_value: u16,
    /// Zero based index along the layer axis
    pub layer: usize,
}

/// A label volume that owns its voxels while structures are being packed into it
struct Layer {
    data: Array3<u16>,
    max_label: u16,
}

impl Layer {
    fn new(foreground: &Array3<bool>) -> Self {
        Self {
            data: foreground.mapv(u16::from),
            max_label: 1,
        }
    }

    fn overlaps(&self, foreground: &Array3<bool>) -> bool {
        match (self.data.as_slice(), foreground.as_slice()) {
            (Some(labels), Some(mask)) => labels
                .par_iter()
                .zip(mask.par_iter())
                .any(|(&label, &fg)| fg && label != 0),
            _ => Zip::from(&self.data)
                .and(foreground)
                .fold(false, |hit, &label, &fg| hit || (fg && label != 0)),
        }
    }

    /// Paint `foreground` with the next free label, `None` if the layer is out of labels
    fn insert(&mut self, foreground: &Array3<bool>) -> Option<u16> {
        let label = self.max_label.checked_add(1)?;
        Zip::from(&mut self.data)
            .and(foreground)
            .par_for_each(|voxel, &fg| {
                if fg {
                    *voxel = label;
                }
            });
        self.max_label = label;
        Some(label)
    }
}

/// Greedy first-fit packing of binary masks into shared label layers.
///
/// Structures are placed in the order they are added. Each one goes into the
/// lowest-indexed layer it does not overlap, taking that layer's highest label
/// plus one; if it overlaps every layer a new layer is appended and the
/// structure gets label 1. Masks that are not binary are skipped without error.
///
/// All masks are expected to share the same geometry. Only the shape is
/// checked; spacing, origin and direction of the last mask seen, packed or
/// skipped, are used for the result.
#[derive(Default)]
pub struct LayerPacker {
    layers: Vec<Layer>,
    segments: Vec<SegmentRecord>,
    names: FxHashSet<String>,
    geometry: Option<Geometry>,
}

impl LayerPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack every `(name, mask)` pair in iteration order
    pub fn pack<'a, I, K>(masks: I) -> Result<PackedSegmentation, PackError>
    where
        I: IntoIterator<Item = (K, &'a Mask)>,
        K: AsRef<str>,
    {
        let mut packer = Self::new();
        for (name, mask) in masks {
            packer.add(name.as_ref(), mask)?;
        }
        packer.finish()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn segments(&self) -> &[SegmentRecord] {
        &self.segments
    }

    /// Add one structure. Returns `Ok(None)` when the mask was skipped for not being binary.
    pub fn add(&mut self, name: &str, mask: &Mask) -> Result<Option<&SegmentRecord>, PackError> {
        if self.names.contains(name) {
            return Err(PackError::DuplicateName(name.to_string()));
        }

        self.geometry = Some(mask.geometry().clone());

        let Some(foreground) = mask.foreground() else {
            debug!("Skipping `{name}`: mask is not binary");
            return Ok(None);
        };

        if let Some(first) = self.layers.first() {
            let expected = first.data.dim();
            if foreground.dim() != expected {
                return Err(PackError::ShapeMismatch {
                    name: name.to_string(),
                    expected,
                    found: foreground.dim(),
                });
            }
        }

        let (layer, label_value) = self.place(&foreground);
        debug!("Packed `{name}` into layer {layer} with label {label_value}");

        self.names.insert(name.to_string());
        self.segments.push(SegmentRecord {
            name: name.to_string(),
            label_value,
            layer,
        });
        Ok(self.segments.last())
    }

    fn place(&mut self, foreground: &Array3<bool>) -> (usize, u16) {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if layer.overlaps(foreground) {
                continue;
            }
            if let Some(label) = layer.insert(foreground) {
                return (index, label);
            }
        }

        self.layers.push(Layer::new(foreground));
        (self.layers.len() - 1, 1)
    }

    /// Stack the layers into one volume. Fails when nothing was packed.
    pub fn finish(self) -> Result<PackedSegmentation, PackError> {
        let (Some(first), Some(geometry)) = (self.layers.first(), self.geometry) else {
            return Err(PackError::NoStructures);
        };

        let (depth, height, width) = first.data.dim();
        let mut data = Array4::<u16>::zeros((depth, height, width, self.layers.len()));
        for (index, layer) in self.layers.iter().enumerate() {
            data.slice_mut(s![.., .., .., index]).assign(&layer.data);
        }

        Ok(PackedSegmentation {
            data,
            geometry,
            segments: self.segments,
        })
    }
}

/// Packed layers stacked along a trailing axis: shape (depth, height, width, layers)
#[derive(Clone, Debug)]
pub struct PackedSegmentation {
    pub data: Array4<u16>,
    pub geometry: Geometry,
    pub segments: Vec<SegmentRecord>,
}

impl PackedSegmentation {
    /// Get the spatial dimensions (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (depth, height, width, _) = self.data.dim();
        (depth, height, width)
    }

    pub fn layer_count(&self) -> usize {
        self.data.dim().3
    }

    pub fn layer(&self, index: usize) -> ArrayView3<'_, u16> {
        self.data.slice(s![.., .., .., index])
    }

    /// Voxel index bounds as `"0 W-1 0 H-1 0 D-1"`
    pub fn extent(&self) -> String {
        let (depth, height, width) = self.dim();
        extent_string(width, height, depth)
    }

    /// Voxels belonging to the segment at output position `index`
    pub fn segment_mask(&self, index: usize) -> Option<Array3<bool>> {
        let segment = self.segments.get(index)?;
        Some(
            self.layer(segment.layer)
                .mapv(|value| value == segment.label_value),
        )
    }
}

pub(crate) fn extent_string(width: usize, height: usize, depth: usize) -> String {
    format!(
        "0 {} 0 {} 0 {}",
        width.saturating_sub(1),
        height.saturating_sub(1),
        depth.saturating_sub(1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const SHAPE: (usize, usize, usize) = (2, 4, 4);

    fn mask_with(voxels: &[(usize, usize, usize)]) -> Mask {
        let mut data = Array3::<u8>::zeros(SHAPE);
        for &(z, y, x) in voxels {
            data[[z, y, x]] = 1;
        }
        Mask::from(data)
    }

    fn row(y: usize) -> Mask {
        let voxels: Vec<_> = (0..SHAPE.0)
            .flat_map(|z| (0..SHAPE.2).map(move |x| (z, y, x)))
            .collect();
        mask_with(&voxels)
    }

    #[test]
    fn disjoint_masks_share_one_layer() {
        let masks = [("a", row(0)), ("b", row(1)), ("c", row(2)), ("d", row(3))];
        let packed = LayerPacker::pack(masks.iter().map(|(n, m)| (*n, m))).unwrap();

        assert_eq!(packed.layer_count(), 1);
        let labels: Vec<_> = packed.segments.iter().map(|s| s.label_value).collect();
        assert_eq!(labels, vec![1, 2, 3, 4]);
        assert!(packed.segments.iter().all(|s| s.layer == 0));
        assert_eq!(packed.data[[1, 3, 2, 0]], 4);
    }

    #[test]
    fn overlapping_masks_get_separate_layers() {
        let masks = [("a", row(1)), ("b", row(1))];
        let packed = LayerPacker::pack(masks.iter().map(|(n, m)| (*n, m))).unwrap();

        assert_eq!(packed.layer_count(), 2);
        assert_eq!(
            packed.segments,
            vec![
                SegmentRecord { name: "a".into(), label_value: 1, layer: 0 },
                SegmentRecord { name: "b".into(), label_value: 1, layer: 1 },
            ]
        );
    }

    #[test]
    fn first_fit_prefers_lowest_layer() {
        // a and b overlap, c is disjoint from both and must land in layer 0
        let masks = [("a", row(0)), ("b", row(0)), ("c", row(3))];
        let packed = LayerPacker::pack(masks.iter().map(|(n, m)| (*n, m))).unwrap();

        let placed: Vec<_> = packed
            .segments
            .iter()
            .map(|s| (s.name.as_str(), s.layer, s.label_value))
            .collect();
        assert_eq!(placed, vec![("a", 0, 1), ("b", 1, 1), ("c", 0, 2)]);
    }

    #[test]
    fn first_fit_ignores_emptier_later_layer() {
        let big = mask_with(&[(0, 0, 0), (0, 0, 1), (0, 1, 0)]);
        let masks = [
            ("big", big.clone()),
            ("big_again", big),
            ("small", mask_with(&[(1, 3, 3)])),
        ];
        let packed = LayerPacker::pack(masks.iter().map(|(n, m)| (*n, m))).unwrap();
        assert_eq!(packed.segments[2].layer, 0);
        assert_eq!(packed.segments[2].label_value, 2);
    }

    #[test]
    fn non_binary_masks_are_skipped() {
        let mut three_valued = Array3::<u8>::zeros(SHAPE);
        three_valued[[0, 0, 0]] = 1;
        three_valued[[0, 0, 1]] = 2;
        let masks = [
            ("a", row(0)),
            ("bad", Mask::from(three_valued)),
            ("empty", Mask::from(Array3::<u8>::zeros(SHAPE))),
            ("b", row(0)),
        ];
        let packed = LayerPacker::pack(masks.iter().map(|(n, m)| (*n, m))).unwrap();

        let names: Vec<_> = packed.segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(packed.layer_count(), 2);
    }

    #[test]
    fn labels_increase_within_a_layer() {
        let mut packer = LayerPacker::new();
        packer.add("base", &row(0)).unwrap();
        packer.add("cover", &row(0)).unwrap();
        packer.add("second", &row(1)).unwrap();
        packer.add("third", &row(2)).unwrap();

        let layer0: Vec<_> = packer
            .segments()
            .iter()
            .filter(|s| s.layer == 0)
            .map(|s| s.label_value)
            .collect();
        assert_eq!(layer0, vec![1, 2, 3]);
        assert_eq!(packer.layer_count(), 2);
    }

    #[test]
    fn segment_masks_reproduce_inputs() {
        let inputs = [("a", row(0)), ("b", row(0)), ("c", row(2))];
        let packed = LayerPacker::pack(inputs.iter().map(|(n, m)| (*n, m))).unwrap();

        for (index, (_, mask)) in inputs.iter().enumerate() {
            let expected = mask.foreground().unwrap();
            assert_eq!(packed.segment_mask(index).unwrap(), expected);
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut packer = LayerPacker::new();
        packer.add("a", &row(0)).unwrap();
        assert!(matches!(
            packer.add("a", &row(1)),
            Err(PackError::DuplicateName(name)) if name == "a"
        ));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let mut packer = LayerPacker::new();
        packer.add("a", &row(0)).unwrap();
        let mut other = Array3::<u8>::zeros((1, 1, 2));
        other[[0, 0, 0]] = 1;
        assert!(matches!(
            packer.add("b", &Mask::from(other)),
            Err(PackError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn nothing_packed_is_an_error() {
        let empty = Mask::from(Array3::<u8>::zeros(SHAPE));
        let result = LayerPacker::pack([("empty", &empty)]);
        assert!(matches!(result, Err(PackError::NoStructures)));
    }

    #[test]
    fn geometry_comes_from_last_mask_seen() {
        let direction = Geometry::default().direction;
        let first = row(0).with_geometry(Geometry::new([1.0; 3], [1.0, 2.0, 3.0], direction));
        let last = row(1).with_geometry(Geometry::new([0.5; 3], [4.0, 5.0, 6.0], direction));
        let skipped = Mask::from(Array3::<u8>::zeros(SHAPE))
            .with_geometry(Geometry::new([0.5; 3], [7.0, 8.0, 9.0], direction));

        let packed = LayerPacker::pack([("a", &first), ("b", &last)]).unwrap();
        assert_eq!(packed.geometry.origin, [4.0, 5.0, 6.0]);
        assert_eq!(packed.extent(), "0 3 0 3 0 1");

        let packed = LayerPacker::pack([("a", &first), ("b", &last), ("c", &skipped)]).unwrap();
        assert_eq!(packed.geometry.origin, [7.0, 8.0, 9.0]);
    }

    #[test]
    fn exhausted_layer_refuses_new_labels() {
        let mut layer = Layer::new(&row(0).foreground().unwrap());
        layer.max_label = u16::MAX;
        assert_eq!(layer.insert(&row(1).foreground().unwrap()), None);
    }
}
