use serde::{Deserialize, Serialize};

/// A cell on the grid. Coordinates are signed so a step off the board is representable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: Point) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

/// Index of the largest element; ties go to the lowest index.
pub fn argmax(v: &[f32]) -> usize {
    let mut best_i = 0;
    let mut best_v = v[0];
    for i in 1..v.len() {
        if v[i] > best_v {
            best_v = v[i];
            best_i = i;
        }
    }
    best_i
}

pub fn has_non_finite(xs: &[f32]) -> bool {
    xs.iter().any(|&v| !v.is_finite())
}

/// min / max / mean of a slice.
pub struct Stats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

pub fn vec_stats(xs: &[f32]) -> Stats {
    if xs.is_empty() {
        return Stats { min: 0.0, max: 0.0, mean: 0.0 };
    }
    let mut mn = xs[0];
    let mut mx = xs[0];
    let mut sum = 0.0f32;
    for &v in xs {
        if v < mn {
            mn = v;
        }
        if v > mx {
            mx = v;
        }
        sum += v;
    }
    Stats { min: mn, max: mx, mean: sum / (xs.len() as f32) }
}

/// Mean of the last `window` values (all of them when fewer are present).
pub fn trailing_mean(xs: &[f32], window: usize) -> f32 {
    let start = xs.len().saturating_sub(window);
    vec_stats(&xs[start..]).mean
}
