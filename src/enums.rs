use std::{f64::consts::PI, fmt, str::FromStr};

use crate::color::Color;

/// Continuous color scales used to auto-generate segment colors.
///
/// Each scale is sampled at 256 evenly spaced buckets, bucket `i` mapping to
/// position `i / 255` along the scale.
#[derive(Clone, Copy, Debug, Default)]
pub enum Colormap {
    #[default]
    Rainbow,
    Jet,
    Gray,
    Custom(fn(u8) -> Color),
}

// (position, value) breakpoints per channel, linearly interpolated
const JET_RED: &[(f64, f64)] = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: &[(f64, f64)] = &[
    (0.0, 0.0),
    (0.125, 0.0),
    (0.375, 1.0),
    (0.64, 1.0),
    (0.91, 0.0),
    (1.0, 0.0),
];
const JET_BLUE: &[(f64, f64)] = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

impl Colormap {
    /// Color at `bucket` in `[0, 255]`, channels clipped to `[0, 1]`
    pub fn sample(&self, bucket: u8) -> Color {
        let x = f64::from(bucket) / 255.0;
        match self {
            Colormap::Rainbow => Color::rgb(
                (2.0 * x - 0.5).abs(),
                (PI * x).sin(),
                (PI * x / 2.0).cos(),
            )
            .clamped(),
            Colormap::Jet => Color::rgb(
                Self::piecewise(JET_RED, x),
                Self::piecewise(JET_GREEN, x),
                Self::piecewise(JET_BLUE, x),
            ),
            Colormap::Gray => Color::rgb(x, x, x),
            Colormap::Custom(scale) => scale(bucket).clamped(),
        }
    }

    fn piecewise(points: &[(f64, f64)], x: f64) -> f64 {
        for pair in points.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if x <= x1 {
                let t = (x - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        points.last().map_or(0.0, |&(_, y)| y)
    }
}

impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rainbow" => Ok(Colormap::Rainbow),
            "jet" => Ok(Colormap::Jet),
            "gray" | "grey" => Ok(Colormap::Gray),
            other => Err(format!(
                "unknown colormap `{other}`, expected one of: rainbow, jet, gray"
            )),
        }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Colormap::Rainbow => "rainbow",
            Colormap::Jet => "jet",
            Colormap::Gray => "gray",
            Colormap::Custom(_) => "custom",
        };
        f.write_str(name)
    }
}

/// Body encoding of a written NRRD file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    #[default]
    Gzip,
}

impl Encoding {
    pub(crate) fn as_nrrd(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Gzip => "gzip",
        }
    }
}
