//! Source data handed to a dump cycle.
//!
//! A [`DataTree`] owns the numeric payloads of one worker. The writer only
//! ever borrows them through [`DatasetSpec`], so planning and writing never
//! copy the arrays.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Element type of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Float64,
    Int32,
}

impl ElementKind {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Float64 => size_of::<f64>(),
            Self::Int32 => size_of::<i32>(),
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float64)
    }
}

/// Borrowed view of externally-owned array data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawData<'a> {
    F64(&'a [f64]),
    I32(&'a [i32]),
}

impl RawData<'_> {
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::F64(_) => ElementKind::Float64,
            Self::I32(_) => ElementKind::Int32,
        }
    }

    pub const fn len(&self) -> usize {
        match self {
            Self::F64(values) => values.len(),
            Self::I32(values) => values.len(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the elements in little-endian order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.kind().size());
        match self {
            Self::F64(values) => values
                .iter()
                .for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            Self::I32(values) => values
                .iter()
                .for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        }
        out
    }
}

/// One named array to write.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetSpec<'a> {
    pub name: &'a str,
    pub shape: &'a [u64],
    pub data: RawData<'a>,
}

impl<'a> DatasetSpec<'a> {
    pub const fn new(name: &'a str, shape: &'a [u64], data: RawData<'a>) -> Self {
        Self { name, shape, data }
    }

    pub const fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    /// Number of elements described by the shape, or `None` if it does not
    /// fit in a `u64`.
    pub fn element_count(&self) -> Option<u64> {
        self.shape.iter().try_fold(1u64, |n, &d| n.checked_mul(d))
    }
}

/// Owned element storage of a [`Variable`].
#[derive(Clone, Debug, PartialEq)]
pub enum Values {
    F64(Vec<f64>),
    I32(Vec<i32>),
}

/// A named variable of a mesh part.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub shape: Vec<u64>,
    pub values: Values,
}

impl Variable {
    pub fn as_dataset(&self) -> DatasetSpec<'_> {
        let data = match &self.values {
            Values::F64(v) => RawData::F64(v),
            Values::I32(v) => RawData::I32(v),
        };
        DatasetSpec::new(&self.name, &self.shape, data)
    }
}

/// One mesh part. Written under its own `domain_{chunk_id:07}` namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshPart {
    pub chunk_id: u32,
    pub vars: Vec<Variable>,
}

impl MeshPart {
    pub fn namespace(&self) -> String {
        format!("domain_{:07}", self.chunk_id)
    }
}

/// All parts owned by one worker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataTree {
    pub parts: Vec<MeshPart>,
}

impl DataTree {
    pub fn new(parts: Vec<MeshPart>) -> Self {
        Self { parts }
    }

    /// Builds deterministic demo content for `rank`.
    ///
    /// Every part carries two floating-point fields and one integer field of
    /// shape `dims`. Chunk ids are global: `rank * parts_per_worker + i`.
    pub fn synthetic(rank: usize, parts_per_worker: usize, dims: &[u64], seed: u64) -> Self {
        let count: u64 = dims.iter().product();
        let mut rng = StdRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));

        let parts = (0..parts_per_worker)
            .map(|i| {
                let chunk_id = (rank * parts_per_worker + i) as u32;
                let pressure = (0..count).map(|_| rng.random_range(0.0..100.0)).collect();
                let temperature = (0..count)
                    .map(|j| 273.15 + (j as f64).sin() * 10.0 + f64::from(chunk_id))
                    .collect();
                let material = (0..count).map(|_| rng.random_range(0..4)).collect();

                MeshPart {
                    chunk_id,
                    vars: vec![
                        Variable {
                            name: "pressure".into(),
                            shape: dims.to_vec(),
                            values: Values::F64(pressure),
                        },
                        Variable {
                            name: "temperature".into(),
                            shape: dims.to_vec(),
                            values: Values::F64(temperature),
                        },
                        Variable {
                            name: "material".into(),
                            shape: dims.to_vec(),
                            values: Values::I32(material),
                        },
                    ],
                }
            })
            .collect();

        Self { parts }
    }

    /// Total number of datasets across all parts.
    pub fn dataset_count(&self) -> usize {
        self.parts.iter().map(|p| p.vars.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_borrows_variable_storage() {
        let var = Variable {
            name: "pressure".into(),
            shape: vec![2, 3],
            values: Values::F64(vec![0.0; 6]),
        };
        let ds = var.as_dataset();
        assert_eq!(ds.element_count(), Some(6));
        assert_eq!(ds.kind(), ElementKind::Float64);
        match (ds.data, &var.values) {
            (RawData::F64(view), Values::F64(owned)) => {
                assert!(core::ptr::eq(view.as_ptr(), owned.as_ptr()));
            }
            _ => panic!("kind mismatch"),
        }
    }

    #[test]
    fn oversized_shape_has_no_element_count() {
        let values = [0.0; 4];
        let shape = [u64::MAX, 2];
        let ds = DatasetSpec::new("huge", &shape, RawData::F64(&values));
        assert_eq!(ds.element_count(), None);
    }

    #[test]
    fn synthetic_tree_is_deterministic_and_globally_numbered() {
        let a = DataTree::synthetic(3, 2, &[4, 5], 7);
        let b = DataTree::synthetic(3, 2, &[4, 5], 7);
        assert_eq!(a, b);
        assert_eq!(a.parts[0].chunk_id, 6);
        assert_eq!(a.parts[1].chunk_id, 7);
        assert_eq!(a.parts[1].namespace(), "domain_0000007");
        assert_eq!(a.dataset_count(), 6);
    }

    #[test]
    fn little_endian_bytes_match_element_size() {
        let ints = [1_i32, -2];
        let bytes = RawData::I32(&ints).to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1_i32.to_le_bytes());
    }
}
