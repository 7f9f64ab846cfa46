//! Object space: the dense, append-only vector store behind the graph.
//!
//! Object `id` lives at `(id - 1) * dimension` in one flat `f32` arena.
//! Objects are never removed, so a slice handed out under a read guard stays
//! valid for as long as the guard is held.

use crate::error::{IndexError, Result};
use crate::graph::distance::DistanceKind;
use crate::graph::ObjectId;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Component type of stored objects.
///
/// `Uint8` objects are rounded and clamped to `0..=255` on append and then
/// stored widened to `f32`, so every distance is computed the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectType {
    #[default]
    Float,
    Uint8,
}

impl ObjectType {
    fn prepare<'a>(&self, vector: &'a [f32]) -> Cow<'a, [f32]> {
        match self {
            ObjectType::Float => Cow::Borrowed(vector),
            ObjectType::Uint8 => Cow::Owned(
                vector
                    .iter()
                    .map(|v| v.round().clamp(0.0, 255.0))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Float => f.write_str("float"),
            ObjectType::Uint8 => f.write_str("uint8"),
        }
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "f" | "f32" => Ok(ObjectType::Float),
            "uint8" | "u8" | "c" => Ok(ObjectType::Uint8),
            other => Err(format!("unknown object type `{other}`")),
        }
    }
}

fn non_finite(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .find(|(_, v)| !v.is_finite())
}

/// Append-only store of fixed-dimension vectors addressed by [`ObjectId`].
#[derive(Debug)]
pub struct ObjectSpace {
    dimension: usize,
    kind: DistanceKind,
    object_type: ObjectType,
    arena: RwLock<Vec<f32>>,
}

impl ObjectSpace {
    pub fn new(dimension: usize, kind: DistanceKind, object_type: ObjectType) -> Self {
        Self {
            dimension,
            kind,
            object_type,
            arena: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a space from a previously exported arena.
    pub fn from_arena(
        dimension: usize,
        kind: DistanceKind,
        object_type: ObjectType,
        arena: Vec<f32>,
    ) -> Result<Self> {
        if dimension == 0 || arena.len() % dimension != 0 {
            return Err(IndexError::corrupt(
                0,
                format!(
                    "arena of {} floats is not a whole number of {dimension}-dimensional objects",
                    arena.len()
                ),
            ));
        }
        if let Some((i, value)) = non_finite(&arena) {
            return Err(IndexError::corrupt(
                (i / dimension) as ObjectId + 1,
                format!("component {} is {value}", i % dimension),
            ));
        }
        if arena.len() / dimension > ObjectId::MAX as usize {
            return Err(IndexError::ResourceExhaustion {
                resource: "object ids",
                reason: format!("{} objects exceed the id range", arena.len() / dimension),
            });
        }
        Ok(Self {
            dimension,
            kind,
            object_type,
            arena: RwLock::new(arena),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn distance_kind(&self) -> DistanceKind {
        self.kind
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Number of stored objects. The largest valid id equals this count.
    pub fn len(&self) -> usize {
        self.arena.read().len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Dimension check plus a finiteness check of every component. `field`
    /// names the rejected input in the error.
    pub fn check_vector(&self, vector: &[f32], field: &'static str) -> Result<()> {
        self.check_dimension(vector)?;
        match non_finite(vector) {
            Some((i, value)) => Err(IndexError::invalid(field, format!("component {i} is {value}"))),
            None => Ok(()),
        }
    }

    /// Store a vector and return its id. Ids are dense and start at 1.
    pub fn append(&self, vector: &[f32]) -> Result<ObjectId> {
        self.check_dimension(vector)?;
        let prepared = self.object_type.prepare(vector);
        let mut arena = self.arena.write();
        let count = arena.len() / self.dimension;
        if let Some((i, value)) = non_finite(vector) {
            return Err(IndexError::invalid(
                "vector",
                format!("component {i} of object {} is {value}", count + 1),
            ));
        }
        if count >= ObjectId::MAX as usize {
            return Err(IndexError::ResourceExhaustion {
                resource: "object ids",
                reason: format!("object space already holds {count} objects"),
            });
        }
        arena.try_reserve(self.dimension).map_err(|e| {
            IndexError::ResourceExhaustion {
                resource: "object arena",
                reason: e.to_string(),
            }
        })?;
        arena.extend_from_slice(&prepared);
        Ok(count as ObjectId + 1)
    }

    /// Shared view used for distance computations.
    ///
    /// Recursive read so a thread already holding a view never deadlocks
    /// behind a waiting writer.
    pub fn read(&self) -> Objects<'_> {
        Objects {
            arena: self.arena.read_recursive(),
            dimension: self.dimension,
            kind: self.kind,
        }
    }

    /// Copy of the whole arena, for persistence.
    pub fn export(&self) -> Vec<f32> {
        self.arena.read().clone()
    }
}

/// Read guard over the object arena.
pub struct Objects<'a> {
    arena: RwLockReadGuard<'a, Vec<f32>>,
    dimension: usize,
    kind: DistanceKind,
}

impl Objects<'_> {
    pub fn len(&self) -> usize {
        self.arena.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, id: ObjectId) -> Option<&[f32]> {
        if id == 0 || id as usize > self.len() {
            return None;
        }
        Some(self.vector(id))
    }

    /// Vector of a known-valid id. Panics on ids outside `1..=len()`.
    #[inline]
    pub fn vector(&self, id: ObjectId) -> &[f32] {
        let start = (id as usize - 1) * self.dimension;
        &self.arena[start..start + self.dimension]
    }

    #[inline]
    pub fn distance(&self, a: ObjectId, b: ObjectId) -> f32 {
        self.kind.distance(self.vector(a), self.vector(b))
    }

    #[inline]
    pub fn distance_to(&self, query: &[f32], id: ObjectId) -> f32 {
        self.kind.distance(query, self.vector(id))
    }
}
