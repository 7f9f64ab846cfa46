//! Readers for the `fvecs` / `ivecs` benchmark formats.
//!
//! Both formats are a sequence of records, each a little-endian `i32`
//! dimension followed by that many 4-byte little-endian components. Every
//! record in a file must share the same dimension.

use crate::error::{IndexError, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Vectors loaded from an `fvecs` file, stored row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorSet {
    pub dimension: usize,
    pub count: usize,
    pub data: Vec<f32>,
}

impl VectorSet {
    /// Row `i`. Panics when `i >= count`.
    pub fn get(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimension..(i + 1) * self.dimension]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn invalid(message: String) -> IndexError {
    IndexError::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

/// Walk the records of `bytes`, returning the shared dimension and the
/// component words of every record.
fn records(bytes: &[u8]) -> Result<(usize, Vec<&[u8]>)> {
    let mut rest = bytes;
    let mut dimension = None;
    let mut out = Vec::new();
    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(IndexError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record {} has a truncated header", out.len()),
            )));
        }
        let header = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if header <= 0 {
            return Err(invalid(format!(
                "record {} declares dimension {header}",
                out.len()
            )));
        }
        let dim = header as usize;
        match dimension {
            None => dimension = Some(dim),
            Some(expected) if expected != dim => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: dim,
                })
            }
            Some(_) => {}
        }
        let body = dim * 4;
        if rest.len() < 4 + body {
            return Err(IndexError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record {} is truncated", out.len()),
            )));
        }
        out.push(&rest[4..4 + body]);
        rest = &rest[4 + body..];
    }
    Ok((dimension.unwrap_or(0), out))
}

pub fn parse_fvecs(bytes: &[u8]) -> Result<VectorSet> {
    let (dimension, rows) = records(bytes)?;
    let mut data = Vec::with_capacity(dimension * rows.len());
    for row in &rows {
        data.extend(
            row.chunks_exact(4)
                .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]])),
        );
    }
    Ok(VectorSet {
        dimension,
        count: rows.len(),
        data,
    })
}

/// Integer lists such as ground truth or top lists. Ids are returned as
/// stored (usually 0-based).
pub fn parse_ivecs(bytes: &[u8]) -> Result<Vec<Vec<u32>>> {
    let (_, rows) = records(bytes)?;
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.chunks_exact(4)
                .map(|w| {
                    let value = i32::from_le_bytes([w[0], w[1], w[2], w[3]]);
                    u32::try_from(value)
                        .map_err(|_| invalid(format!("record {i} holds negative id {value}")))
                })
                .collect()
        })
        .collect()
}

pub fn read_fvecs(path: impl AsRef<Path>) -> Result<VectorSet> {
    let path = path.as_ref();
    let set = parse_fvecs(&fs::read(path)?)?;
    tracing::debug!("Read {} vectors of dimension {} from {:?}", set.count, set.dimension, path);
    Ok(set)
}

pub fn read_ivecs(path: impl AsRef<Path>) -> Result<Vec<Vec<u32>>> {
    let path = path.as_ref();
    let lists = parse_ivecs(&fs::read(path)?)?;
    tracing::debug!("Read {} id lists from {:?}", lists.len(), path);
    Ok(lists)
}

/// Encode vectors as `fvecs`.
pub fn encode_fvecs<'a>(rows: impl IntoIterator<Item = &'a [f32]>) -> Vec<u8> {
    let mut out = Vec::new();
    for row in rows {
        out.extend_from_slice(&(row.len() as i32).to_le_bytes());
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Encode id lists as `ivecs`.
pub fn encode_ivecs<'a>(rows: impl IntoIterator<Item = &'a [u32]>) -> Vec<u8> {
    let mut out = Vec::new();
    for row in rows {
        out.extend_from_slice(&(row.len() as i32).to_le_bytes());
        for v in row {
            out.extend_from_slice(&(*v as i32).to_le_bytes());
        }
    }
    out
}
