use crate::volume::{Geometry, Mask};

use indexmap::IndexMap;
use log::debug;
use ndarray::Array3;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaskLoaderError {
    #[error("No NIfTI masks found")]
    NoMasksFound,

    #[error("Cannot derive a structure name from {0}")]
    InvalidName(PathBuf),

    #[error("Structure name `{0}` is used by more than one file")]
    DuplicateName(String),

    #[error("{path} is not a 3D volume (shape {shape:?})")]
    NotThreeDimensional { path: PathBuf, shape: Vec<usize> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
}

pub struct MaskLoader;

impl MaskLoader {
    /// Load a single NIfTI mask
    ///
    /// Voxels are reordered to (depth, height, width) and the geometry is
    /// converted to the LPS frame.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or holds more than three
    /// non-singleton dimensions
    pub fn load_mask(path: impl AsRef<Path>) -> Result<Mask, MaskLoaderError> {
        let path = path.as_ref();
        let object = ReaderOptions::new().read_file(path)?;
        let geometry = Self::geometry_from_header(object.header());

        let volume = object.into_volume().into_ndarray::<f32>()?;
        let shape = volume.shape().to_vec();
        let not_3d = || MaskLoaderError::NotThreeDimensional {
            path: path.to_path_buf(),
            shape: shape.clone(),
        };

        if shape.len() < 3 || shape[3..].iter().any(|&extent| extent != 1) {
            return Err(not_3d());
        }

        // [x, y, z] -> [z, y, x]
        let voxels: Vec<f32> = volume.iter().copied().collect();
        let data = Array3::from_shape_vec((shape[0], shape[1], shape[2]), voxels)
            .map_err(|_| not_3d())?
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned();

        Ok(Mask::new(data, geometry))
    }

    /// Load masks from file paths, keyed by structure name in the order given
    ///
    /// # Arguments
    ///
    /// * `paths` - NIfTI files, one structure each
    /// * `prefix` - Optional file name prefix removed from structure names
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        prefix: Option<&str>,
    ) -> Result<IndexMap<String, Mask>, MaskLoaderError> {
        if paths.is_empty() {
            return Err(MaskLoaderError::NoMasksFound);
        }

        let mut masks = IndexMap::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let name = Self::structure_name(path, prefix)
                .ok_or_else(|| MaskLoaderError::InvalidName(path.to_path_buf()))?;
            if masks.contains_key(&name) {
                return Err(MaskLoaderError::DuplicateName(name));
            }

            debug!("Loading `{name}` from {}", path.display());
            masks.insert(name, Self::load_mask(path)?);
        }

        Ok(masks)
    }

    /// Load every `.nii` / `.nii.gz` file in a directory, sorted by file name
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        prefix: Option<&str>,
    ) -> Result<IndexMap<String, Mask>, MaskLoaderError> {
        let mut paths = fs::read_dir(path.as_ref())?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.retain(|path| path.is_file() && Self::is_nifti(path));

        if paths.is_empty() {
            return Err(MaskLoaderError::NoMasksFound);
        }

        paths.sort();
        Self::load_from_file_paths(&paths, prefix)
    }

    pub fn is_nifti(path: &Path) -> bool {
        Self::file_stem(path).is_some()
    }

    fn file_stem(path: &Path) -> Option<&str> {
        let file_name = path.file_name()?.to_str()?;
        let lower = file_name.to_ascii_lowercase();
        let suffix = [".nii.gz", ".nii"]
            .into_iter()
            .find(|suffix| lower.ends_with(suffix))?;
        Some(&file_name[..file_name.len() - suffix.len()])
    }

    /// Structure name for a mask file: the file name without its NIfTI
    /// extension and without `prefix`
    pub fn structure_name(path: &Path, prefix: Option<&str>) -> Option<String> {
        let stem = Self::file_stem(path)?;
        let name = prefix
            .and_then(|prefix| stem.strip_prefix(prefix))
            .unwrap_or(stem);
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Voxel-to-world placement from the sform, the qform or plain pixdim, in that order
    pub fn geometry_from_header(header: &NiftiHeader) -> Geometry {
        let spacing = [1, 2, 3].map(|axis| {
            let size = f64::from(header.pixdim[axis]).abs();
            if size > 0.0 { size } else { 1.0 }
        });

        let (axes, origin) = if header.sform_code > 0 {
            let rows = [header.srow_x, header.srow_y, header.srow_z].map(|row| row.map(f64::from));
            (
                [0, 1, 2].map(|axis| [rows[0][axis], rows[1][axis], rows[2][axis]]),
                [rows[0][3], rows[1][3], rows[2][3]],
            )
        } else if header.qform_code > 0 {
            let rotation = quaternion_rotation(
                f64::from(header.quatern_b),
                f64::from(header.quatern_c),
                f64::from(header.quatern_d),
            );
            let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            (
                [0, 1, 2].map(|axis| {
                    let scale = if axis == 2 { spacing[axis] * qfac } else { spacing[axis] };
                    [
                        rotation[0][axis] * scale,
                        rotation[1][axis] * scale,
                        rotation[2][axis] * scale,
                    ]
                }),
                [
                    f64::from(header.quatern_x),
                    f64::from(header.quatern_y),
                    f64::from(header.quatern_z),
                ],
            )
        } else {
            (
                [
                    [spacing[0], 0.0, 0.0],
                    [0.0, spacing[1], 0.0],
                    [0.0, 0.0, spacing[2]],
                ],
                [0.0; 3],
            )
        };

        // NIfTI world space is RAS
        let axes = axes.map(|[x, y, z]| [-x, -y, z]);
        let origin = [-origin[0], -origin[1], origin[2]];
        Geometry::from_axis_vectors(axes, origin)
    }
}

fn quaternion_rotation(b: f64, c: f64, d: f64) -> [[f64; 3]; 3] {
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - c * c - b * b,
        ],
    ]
}
