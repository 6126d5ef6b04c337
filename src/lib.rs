//! # Segment-volume library
//!
//! This crate packs a set of binary structure masks into a single
//! multi-layer labelmap and writes it as a `.seg.nrrd` segmentation that
//! 3D Slicer opens with every structure named and colored.

//!
//! Structures that do not overlap share a layer and are told apart by their
//! label value; overlapping structures are pushed onto additional layers.
//! Packing is greedy first-fit in the order the masks are given:
//!  - the first structure of a layer gets label 1
//!  - later structures in the same layer get the layer's highest label plus one
//!  - masks that do not hold exactly two distinct values are skipped
//!
//!  Masks are assumed to share one geometry (shape, spacing, origin and
//!  direction). The shape is checked, the rest is taken from the last mask.
//!  Per-structure properties are written as `Segment{i}_*` key/value pairs
//!  (`Color`, `ColorAutoGenerated`, `Extent`, `ID`, `LabelValue`, `Layer`,
//!  `Name`, `NameAutoGenerated`, `Tags`) numbered by output position.
//!
//! # Examples
//!
//! ## Writing a directory of NIfTI masks as one segmentation
//!
//! To read every `.nii.gz` mask from the masks/ directory and write them with
//! colors taken from the rainbow scale:
//!
//! ```no_run
//! # use segment_volume::{ColorSource, Colormap, MaskLoader, export};
//! let masks = MaskLoader::load_from_directory("masks", None)
//!     .expect("should have loaded masks from directory");
//! let segments = export(&masks, "structure_set.seg.nrrd", &ColorSource::from(Colormap::Rainbow))
//!     .expect("should have written the segmentation");
//! println!("{} segments written", segments.len());
//! ```
//!
//! ## Packing without writing
//!
//! ```
//! # use segment_volume::{LayerPacker, Mask};
//! # use ndarray::Array3;
//! let mut body = Array3::<u8>::zeros((4, 4, 4));
//! body.fill(1);
//! body[[0, 0, 0]] = 0;
//! let mut lesion = Array3::<u8>::zeros((4, 4, 4));
//! lesion[[2, 2, 2]] = 1;
//!
//! let body = Mask::from(body);
//! let lesion = Mask::from(lesion);
//! let packed = LayerPacker::pack([("Body", &body), ("Lesion", &lesion)])
//!     .expect("both masks are binary");
//! assert_eq!(packed.layer_count(), 2);
//! ```

pub mod color;
pub mod enums;
pub mod exporter;
pub mod mask_loader;
pub mod nrrd;
pub mod packer;
pub mod volume;

pub use color::{Color, ColorMapError, ColorSource};
pub use enums::{Colormap, Encoding};
pub use exporter::{ExportError, Segment, SegmentationExporter, export, read_segments};
pub use mask_loader::{MaskLoader, MaskLoaderError};
pub use nrrd::{NrrdError, NrrdImage};
pub use packer::{LayerPacker, PackError, PackedSegmentation, SegmentRecord};
pub use volume::{Geometry, Mask};
