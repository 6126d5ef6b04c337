use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    io::Read,
};

use rustc_hash::FxHasher;
use thiserror::Error;

use crate::enums::Colormap;

#[derive(Debug, Error)]
pub enum ColorMapError {
    #[error("Invalid color map: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Color for `{name}` must have 3 or 4 channels, found {found}")]
    ChannelCount { name: String, found: usize },
}

/// RGBA color with channels in `[0, 1]`. Only RGB ends up in segment metadata.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Accepts `[r, g, b]` or `[r, g, b, a]`
    pub fn from_slice(channels: &[f64]) -> Option<Self> {
        match *channels {
            [r, g, b] => Some(Self::rgb(r, g, b)),
            [r, g, b, a] => Some(Self::rgba(r, g, b, a)),
            _ => None,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    /// `"r g b"`, integral values keep their `.0` so `1` is written as `1.0`
    pub fn to_segment_string(&self) -> String {
        format!("{:?} {:?} {:?}", self.r, self.g, self.b)
    }

    /// Parses the `Segment{i}_Color` representation back into a color
    pub fn parse_segment_string(value: &str) -> Option<Self> {
        let channels = value
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        Self::from_slice(&channels)
    }
}

impl From<[f64; 3]> for Color {
    fn from([r, g, b]: [f64; 3]) -> Self {
        Self::rgb(r, g, b)
    }
}

/// Where segment colors come from
#[derive(Clone, Debug)]
pub enum ColorSource {
    /// Sample a continuous scale at a bucket derived from the structure name
    Continuous(Colormap),
    /// Look colors up by structure name
    Explicit(HashMap<String, Color>),
}

impl Default for ColorSource {
    fn default() -> Self {
        ColorSource::Continuous(Colormap::default())
    }
}

impl From<Colormap> for ColorSource {
    fn from(colormap: Colormap) -> Self {
        ColorSource::Continuous(colormap)
    }
}

impl From<HashMap<String, Color>> for ColorSource {
    fn from(colors: HashMap<String, Color>) -> Self {
        ColorSource::Explicit(colors)
    }
}

impl ColorSource {
    /// Color for structure `name`, `None` when an explicit map has no entry for it
    pub fn color_for(&self, name: &str) -> Option<Color> {
        match self {
            ColorSource::Continuous(colormap) => Some(colormap.sample(color_bucket(name))),
            ColorSource::Explicit(colors) => colors.get(name).copied(),
        }
    }

    /// Explicit colors from a JSON object mapping names to `[r, g, b]` or `[r, g, b, a]`
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, ColorMapError> {
        let raw: HashMap<String, Vec<f64>> = serde_json::from_reader(reader)?;

        let colors = raw
            .into_iter()
            .map(|(name, channels)| match Color::from_slice(&channels) {
                Some(color) => Ok((name, color)),
                None => Err(ColorMapError::ChannelCount {
                    found: channels.len(),
                    name,
                }),
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(ColorSource::Explicit(colors))
    }
}

/// Bucket in `[0, 255]` for a structure name. Stable across processes and runs.
pub fn color_bucket(name: &str) -> u8 {
    let mut hasher = FxHasher::default();
    name.hash(&mut hasher);
    (hasher.finish() % 256) as u8
}
