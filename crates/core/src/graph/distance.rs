//! Distance functions for the object space.
//!
//! Every kind is symmetric and non-negative, which the search pruning rule
//! `(1 + epsilon) * worst` relies on. Loops are chunked by 8 lanes so the
//! compiler can vectorize them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LANES: usize = 8;

/// Distance function used between stored objects and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Manhattan distance.
    L1,
    /// Euclidean distance (not squared).
    #[default]
    L2,
    /// `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Angle between the vectors in radians. Range: \[0, π\].
    Angle,
}

impl DistanceKind {
    /// Distance between two equally long slices.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceKind::L1 => l1(a, b),
            DistanceKind::L2 => l2_squared(a, b).sqrt(),
            DistanceKind::Cosine => (1.0 - cosine_similarity(a, b)).max(0.0),
            DistanceKind::Angle => cosine_similarity(a, b).clamp(-1.0, 1.0).acos(),
        }
    }
}

impl fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceKind::L1 => "l1",
            DistanceKind::L2 => "l2",
            DistanceKind::Cosine => "cosine",
            DistanceKind::Angle => "angle",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Ok(DistanceKind::L1),
            "l2" => Ok(DistanceKind::L2),
            "cosine" | "c" => Ok(DistanceKind::Cosine),
            "angle" | "a" => Ok(DistanceKind::Angle),
            other => Err(format!("unknown distance kind `{other}`")),
        }
    }
}

#[inline]
fn l1(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let (ca, cb) = (a.chunks_exact(LANES), b.chunks_exact(LANES));
    let tail: f32 = ca
        .remainder()
        .iter()
        .zip(cb.remainder())
        .map(|(x, y)| (x - y).abs())
        .sum();
    for (x, y) in ca.zip(cb) {
        for i in 0..LANES {
            acc[i] += (x[i] - y[i]).abs();
        }
    }
    acc.iter().sum::<f32>() + tail
}

#[inline]
fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let (ca, cb) = (a.chunks_exact(LANES), b.chunks_exact(LANES));
    let tail: f32 = ca
        .remainder()
        .iter()
        .zip(cb.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    for (x, y) in ca.zip(cb) {
        for i in 0..LANES {
            let d = x[i] - y[i];
            acc[i] += d * d;
        }
    }
    acc.iter().sum::<f32>() + tail
}

/// Cosine similarity; 0 when either vector has zero norm.
#[inline]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = [0.0f32; LANES];
    let mut na = [0.0f32; LANES];
    let mut nb = [0.0f32; LANES];
    let (ca, cb) = (a.chunks_exact(LANES), b.chunks_exact(LANES));
    let (mut tdot, mut tna, mut tnb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in ca.remainder().iter().zip(cb.remainder()) {
        tdot += x * y;
        tna += x * x;
        tnb += y * y;
    }
    for (x, y) in ca.zip(cb) {
        for i in 0..LANES {
            dot[i] += x[i] * y[i];
            na[i] += x[i] * x[i];
            nb[i] += y[i] * y[i];
        }
    }
    let dot = dot.iter().sum::<f32>() + tdot;
    let norm = ((na.iter().sum::<f32>() + tna) * (nb.iter().sum::<f32>() + tnb)).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}
