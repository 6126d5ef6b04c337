use crate::{
    color::{Color, ColorSource},
    enums::Encoding,
    nrrd::{NrrdError, NrrdImage},
    packer::{LayerPacker, PackError, PackedSegmentation, SegmentRecord},
    volume::Mask,
};

use log::info;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Packing failed: {0}")]
    Pack(#[from] PackError),

    #[error("No color given for structure `{0}`")]
    MissingColor(String),

    #[error("Writing failed: {0}")]
    Nrrd(#[from] NrrdError),
}

impl ExportError {
    /// The masks handed in cannot form a single segmentation
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ExportError::Pack(PackError::DuplicateName(_) | PackError::ShapeMismatch { .. })
        )
    }

    /// An explicit color map had no entry for an included structure
    pub fn is_lookup_error(&self) -> bool {
        matches!(self, ExportError::MissingColor(_))
    }
}

/// Per-segment property names, in the order they are written
pub const SEGMENT_FIELDS: [&str; 9] = [
    "Color",
    "ColorAutoGenerated",
    "Extent",
    "ID",
    "LabelValue",
    "Layer",
    "Name",
    "NameAutoGenerated",
    "Tags",
];

fn segment_key(index: usize, field: &str) -> String {
    format!("Segment{index}_{field}")
}

/// A packed structure together with the color it is displayed with
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub record: SegmentRecord,
    pub color: Color,
}

impl Segment {
    fn properties(&self, index: usize, extent: &str) -> Vec<(String, String)> {
        let values = [
            self.color.to_segment_string(),
            "1".to_string(),
            extent.to_string(),
            format!("Segment_{}", index + 1),
            self.record.label_value.to_string(),
            self.record.layer.to_string(),
            self.record.name.clone(),
            "1".to_string(),
            String::new(),
        ];
        SEGMENT_FIELDS
            .iter()
            .zip(values)
            .map(|(field, value)| (segment_key(index, field), value))
            .collect()
    }

    /// Decode the segment stored at position `index` of a written file
    pub fn from_image(image: &NrrdImage, index: usize) -> Result<Self, NrrdError> {
        let parsed = |field: &str| -> Result<(String, String), NrrdError> {
            let key = segment_key(index, field);
            let value = image.key_value(&key)?.to_string();
            Ok((key, value))
        };
        let invalid = |(field, value): (String, String)| NrrdError::InvalidField { field, value };

        let name = parsed("Name")?.1;

        let label = parsed("LabelValue")?;
        let label_value: u16 = label.1.trim().parse().map_err(|_| invalid(label))?;

        let layer = parsed("Layer")?;
        let layer_index: usize = layer.1.trim().parse().map_err(|_| invalid(layer))?;

        let color = parsed("Color")?;
        let color = Color::parse_segment_string(&color.1).ok_or_else(|| invalid(color))?;

        Ok(Self {
            record: SegmentRecord {
                name,
                label_value,
                layer: layer_index,
            },
            color,
        })
    }
}

/// All segments described by a written file, in index order
pub fn read_segments(image: &NrrdImage) -> Result<Vec<Segment>, NrrdError> {
    (0..)
        .take_while(|&index| image.key_values.contains_key(&segment_key(index, "Name")))
        .map(|index| Segment::from_image(image, index))
        .collect()
}

/// Packs masks and writes them as a single `.seg.nrrd` segmentation
#[derive(Clone, Debug, Default)]
pub struct SegmentationExporter {
    color_source: ColorSource,
    encoding: Encoding,
}

impl SegmentationExporter {
    pub fn new(color_source: ColorSource) -> Self {
        Self {
            color_source,
            encoding: Encoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Pack `masks` in iteration order and write the result to `output_path`.
    ///
    /// Nothing is written when packing fails, when no mask is binary, or when
    /// an explicit color map lacks one of the included structures.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] on duplicate names, mismatched mask shapes,
    /// missing colors, an empty result or a failed write.
    pub fn export<'a, I, K>(
        &self,
        masks: I,
        output_path: impl AsRef<Path>,
    ) -> Result<Vec<Segment>, ExportError>
    where
        I: IntoIterator<Item = (K, &'a Mask)>,
        K: AsRef<str>,
    {
        let packed = LayerPacker::pack(masks)?;
        let (image, segments) = self.to_image(packed)?;

        let output_path = output_path.as_ref();
        image.write(output_path, self.encoding)?;
        info!(
            "Wrote {} segments in {} layers to {}",
            segments.len(),
            image.data.dim().3,
            output_path.display()
        );

        Ok(segments)
    }

    /// Attach colors and segment properties to a packed volume
    pub fn to_image(
        &self,
        packed: PackedSegmentation,
    ) -> Result<(NrrdImage, Vec<Segment>), ExportError> {
        let extent = packed.extent();
        let PackedSegmentation {
            data,
            geometry,
            segments: records,
        } = packed;

        let segments = records
            .into_iter()
            .map(|record| -> Result<Segment, ExportError> {
                let color = self
                    .color_source
                    .color_for(&record.name)
                    .ok_or_else(|| ExportError::MissingColor(record.name.clone()))?;
                Ok(Segment { record, color })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut image = NrrdImage::new(data, geometry);
        for (index, segment) in segments.iter().enumerate() {
            image.key_values.extend(segment.properties(index, &extent));
        }

        Ok((image, segments))
    }
}

/// Pack `masks` and write them to `output_path` using `color_source` for segment colors
pub fn export<'a, I, K>(
    masks: I,
    output_path: impl AsRef<Path>,
    color_source: &ColorSource,
) -> Result<Vec<Segment>, ExportError>
where
    I: IntoIterator<Item = (K, &'a Mask)>,
    K: AsRef<str>,
{
    SegmentationExporter::new(color_source.clone()).export(masks, output_path)
}
