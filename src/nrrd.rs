//! Minimal NRRD support for 16-bit labelmaps.
//!
//! Written files use the layout 3D Slicer expects for segmentations: a
//! non-spatial `list` axis first (one entry per layer) followed by the x, y
//! and z domain axes, LPS space, and segment properties stored as
//! `key:=value` pairs.

use crate::{enums::Encoding, volume::Geometry};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use indexmap::IndexMap;
use ndarray::Array4;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};
use thiserror::Error;

const MAGIC: &str = "NRRD0004";

#[derive(Debug, Error)]
pub enum NrrdError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not an NRRD file")]
    InvalidMagic,

    #[error("Missing field `{0}`")]
    MissingField(String),

    #[error("Invalid value `{value}` for field `{field}`")]
    InvalidField { field: String, value: String },

    #[error("Unsupported NRRD content: {0}")]
    Unsupported(String),

    #[error("Expected {expected} bytes of pixel data, found {found}")]
    SizeMismatch { expected: usize, found: usize },
}

/// A labelmap volume with its geometry and free-form key/value metadata.
///
/// `data` has shape (depth, height, width, layers). A plain 3D file reads back
/// with a single layer.
#[derive(Clone, Debug, PartialEq)]
pub struct NrrdImage {
    pub data: Array4<u16>,
    pub geometry: Geometry,
    pub key_values: IndexMap<String, String>,
}

impl NrrdImage {
    pub fn new(data: Array4<u16>, geometry: Geometry) -> Self {
        Self {
            data,
            geometry,
            key_values: IndexMap::new(),
        }
    }

    pub fn write(&self, path: impl AsRef<Path>, encoding: Encoding) -> Result<(), NrrdError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut writer, encoding)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W, encoding: Encoding) -> Result<(), NrrdError> {
        writer.write_all(self.header(encoding).as_bytes())?;

        let samples: Vec<u16> = self.data.iter().copied().collect();
        let bytes: &[u8] = bytemuck::cast_slice(&samples);
        match encoding {
            Encoding::Raw => writer.write_all(bytes)?,
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(&mut writer, Compression::default());
                encoder.write_all(bytes)?;
                encoder.finish()?;
            }
        }
        Ok(())
    }

    fn header(&self, encoding: Encoding) -> String {
        let (depth, height, width, layers) = self.data.dim();
        let directions = (0..3)
            .map(|axis| format_vector(&self.geometry.axis_vector(axis)))
            .collect::<Vec<_>>()
            .join(" ");
        let endian = if cfg!(target_endian = "big") {
            "big"
        } else {
            "little"
        };

        let mut header = String::new();
        header.push_str(MAGIC);
        header.push('\n');
        header.push_str("# Complete NRRD file format specification at:\n");
        header.push_str("# http://teem.sourceforge.net/nrrd/format.html\n");
        header.push_str("type: unsigned short\n");
        header.push_str("dimension: 4\n");
        header.push_str("space: left-posterior-superior\n");
        header.push_str(&format!("sizes: {layers} {width} {height} {depth}\n"));
        header.push_str(&format!("space directions: none {directions}\n"));
        header.push_str("kinds: list domain domain domain\n");
        header.push_str(&format!("endian: {endian}\n"));
        header.push_str(&format!("encoding: {}\n", encoding.as_nrrd()));
        header.push_str(&format!(
            "space origin: {}\n",
            format_vector(&self.geometry.origin)
        ));
        for (key, value) in &self.key_values {
            header.push_str(&format!("{key}:={}\n", escape(value)));
        }
        header.push('\n');
        header
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, NrrdError> {
        Self::read_from(BufReader::new(File::open(path.as_ref())?))
    }

    pub fn read_from<R: BufRead>(mut reader: R) -> Result<Self, NrrdError> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if !line.starts_with("NRRD000") {
            return Err(NrrdError::InvalidMagic);
        }

        let mut fields = IndexMap::new();
        let mut key_values = IndexMap::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let entry = line.trim_end_matches(['\r', '\n']);
            if entry.is_empty() {
                break;
            }
            if entry.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = entry.split_once(":=") {
                key_values.insert(key.to_string(), unescape(value));
            } else if let Some((field, value)) = entry.split_once(": ") {
                fields.insert(field.trim().to_ascii_lowercase(), value.trim().to_string());
            } else {
                return Err(NrrdError::InvalidField {
                    field: entry.to_string(),
                    value: String::new(),
                });
            }
        }

        let header = Header::parse(&fields)?;

        let mut body = Vec::new();
        if header.gzip {
            GzDecoder::new(reader).read_to_end(&mut body)?;
        } else {
            reader.read_to_end(&mut body)?;
        }

        let (layers, width, height, depth) = header.shape;
        let expected = header.byte_len;
        if body.len() < expected {
            return Err(NrrdError::SizeMismatch {
                expected,
                found: body.len(),
            });
        }

        let samples: Vec<u16> = body[..expected]
            .chunks_exact(2)
            .map(|pair| {
                let pair = [pair[0], pair[1]];
                if header.big_endian {
                    u16::from_be_bytes(pair)
                } else {
                    u16::from_le_bytes(pair)
                }
            })
            .collect();

        let data = Array4::from_shape_vec((depth, height, width, layers), samples).map_err(
            |_| NrrdError::SizeMismatch {
                expected,
                found: body.len(),
            },
        )?;

        Ok(Self {
            data,
            geometry: header.geometry,
            key_values,
        })
    }

    /// Value stored under `key:=`, `MissingField` if absent
    pub fn key_value(&self, key: &str) -> Result<&str, NrrdError> {
        self.key_values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| NrrdError::MissingField(key.to_string()))
    }
}

struct Header {
    /// (layers, width, height, depth)
    shape: (usize, usize, usize, usize),
    /// Body length in bytes for `shape`
    byte_len: usize,
    geometry: Geometry,
    gzip: bool,
    big_endian: bool,
}

impl Header {
    fn parse(fields: &IndexMap<String, String>) -> Result<Self, NrrdError> {
        let get = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| NrrdError::MissingField(name.to_string()))
        };
        let invalid = |field: &str, value: &str| NrrdError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        };

        let pixel_type = get("type")?;
        if !matches!(
            pixel_type,
            "unsigned short" | "ushort" | "unsigned short int" | "uint16" | "uint16_t"
        ) {
            return Err(NrrdError::Unsupported(format!("pixel type `{pixel_type}`")));
        }

        let gzip = match get("encoding")? {
            "raw" => false,
            "gzip" | "gz" => true,
            other => return Err(NrrdError::Unsupported(format!("encoding `{other}`"))),
        };

        let big_endian = match fields.get("endian").map(String::as_str) {
            None | Some("little") => false,
            Some("big") => true,
            Some(other) => return Err(invalid("endian", other)),
        };

        let sizes_value = get("sizes")?;
        let sizes = sizes_value
            .split_whitespace()
            .map(str::parse::<usize>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("sizes", sizes_value))?;
        let shape = match sizes[..] {
            [width, height, depth] => (1, width, height, depth),
            [layers, width, height, depth] => (layers, width, height, depth),
            _ => {
                return Err(NrrdError::Unsupported(format!(
                    "{} dimensional data",
                    sizes.len()
                )));
            }
        };
        let byte_len = sizes
            .iter()
            .try_fold(2usize, |total, &size| total.checked_mul(size))
            .ok_or_else(|| invalid("sizes", sizes_value))?;

        let mut axes = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        if let Some(value) = fields.get("space directions") {
            let vectors = value
                .split_whitespace()
                .filter(|token| *token != "none")
                .map(parse_vector)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("space directions", value))?;
            axes = vectors
                .try_into()
                .map_err(|_| invalid("space directions", value))?;
        }

        let mut origin = [0.0; 3];
        if let Some(value) = fields.get("space origin") {
            origin = parse_vector(value).ok_or_else(|| invalid("space origin", value))?;
        }

        // RAS files are flipped into the LPS frame used everywhere else
        if let Some("right-anterior-superior" | "RAS") = fields.get("space").map(String::as_str) {
            for axis in axes.iter_mut() {
                axis[0] = -axis[0];
                axis[1] = -axis[1];
            }
            origin[0] = -origin[0];
            origin[1] = -origin[1];
        }

        Ok(Self {
            shape,
            byte_len,
            geometry: Geometry::from_axis_vectors(axes, origin),
            gzip,
            big_endian,
        })
    }
}

fn format_vector(vector: &[f64; 3]) -> String {
    format!("({},{},{})", vector[0], vector[1], vector[2])
}

fn parse_vector(token: &str) -> Option<[f64; 3]> {
    let inner = token.trim().strip_prefix('(')?.strip_suffix(')')?;
    let values = inner
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    values.try_into().ok()
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
