use ndarray::Array3;
use rustc_hash::FxHashSet;

/// Physical placement of a voxel grid in LPS patient space.
///
/// Axis order follows ITK: index 0 is x (width), 1 is y (height) and 2 is z
/// (depth), even though the voxel arrays themselves are stored as
/// (depth, height, width).
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    /// Voxel size along x, y and z in millimetres
    pub spacing: [f64; 3],
    /// World position of the centre of voxel (0, 0, 0)
    pub origin: [f64; 3],
    /// Direction cosines, row major. Column `j` is the world direction of index axis `j`.
    pub direction: [[f64; 3]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl Geometry {
    pub fn new(spacing: [f64; 3], origin: [f64; 3], direction: [[f64; 3]; 3]) -> Self {
        Self {
            spacing,
            origin,
            direction,
        }
    }

    /// World-space step taken when moving one voxel along index axis `axis`
    pub fn axis_vector(&self, axis: usize) -> [f64; 3] {
        let spacing = self.spacing[axis];
        [
            self.direction[0][axis] * spacing,
            self.direction[1][axis] * spacing,
            self.direction[2][axis] * spacing,
        ]
    }

    /// Inverse of [`Geometry::axis_vector`]: rebuilds spacing and direction from
    /// the three per-axis step vectors.
    pub fn from_axis_vectors(axes: [[f64; 3]; 3], origin: [f64; 3]) -> Self {
        let mut spacing = [1.0; 3];
        let mut direction = [[0.0; 3]; 3];

        for (axis, vector) in axes.iter().enumerate() {
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                spacing[axis] = norm;
                for row in 0..3 {
                    direction[row][axis] = vector[row] / norm;
                }
            } else {
                direction[axis][axis] = 1.0;
            }
        }

        Self {
            spacing,
            origin,
            direction,
        }
    }
}

/// A single structure's voxel mask.
///
/// Any voxel type is accepted on construction; packing only uses masks that
/// contain exactly two distinct values, with voxels `> 0` as foreground.
#[derive(Clone, Debug, Default)]
pub struct Mask {
    data: Array3<f32>,
    geometry: Geometry,
}

impl Mask {
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Build a mask with unit spacing at the origin
    pub fn from_array(data: Array3<f32>) -> Self {
        Self::new(data, Geometry::default())
    }

    /// Get the dimensions of the mask (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Number of distinct voxel values, counting no further than `limit`
    fn distinct_values(&self, limit: usize) -> usize {
        let mut seen = FxHashSet::default();
        for &value in self.data.iter() {
            // folds -0.0 into 0.0
            seen.insert((value + 0.0).to_bits());
            if seen.len() >= limit {
                break;
            }
        }
        seen.len()
    }

    /// True when the mask holds exactly one background and one foreground value
    pub fn is_binary(&self) -> bool {
        self.distinct_values(3) == 2
    }

    /// Foreground voxels of a binary mask, `None` for anything else
    pub fn foreground(&self) -> Option<Array3<bool>> {
        if !self.is_binary() {
            return None;
        }
        Some(self.data.map(|&v| v > 0.0))
    }
}

impl From<Array3<u8>> for Mask {
    fn from(data: Array3<u8>) -> Self {
        Self::from_array(data.mapv(f32::from))
    }
}

impl From<Array3<bool>> for Mask {
    fn from(data: Array3<bool>) -> Self {
        Self::from_array(data.mapv(|v| if v { 1.0 } else { 0.0 }))
    }
}
