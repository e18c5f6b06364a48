//! Generates the [`Operation`]s that a load run sends to the key-value server.
//!
//! Operations are never materialized up front. An [`OperationSource`] recomputes operation `i`
//! from the run's seed and the index alone, so arbitrarily large runs need constant memory and
//! every worker can start at any offset of the sequence.

use std::fmt;
use std::ops::Range;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Key read by a `GET` that has no earlier operation to refer to.
pub const PROBE_KEY: &str = "foo";

/// Spreads consecutive indices across the seed space, so that runs with neighboring seeds do not
/// share shifted copies of the same sequence.
const INDEX_MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

/// The kind of request an [`Operation`] turns into.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OpKind {
    /// A write of a single key.
    Put,
    /// A read of a single key.
    Get,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => f.write_str("PUT"),
            Self::Get => f.write_str("GET"),
        }
    }
}

/// One logical request against the key-value server.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// Store `value` under `key`.
    Put {
        /// The key to write.
        key: String,
        /// The value stored under the key.
        value: String,
    },
    /// Read the value stored under `key`.
    Get {
        /// The key to read.
        key: String,
    },
}

impl Operation {
    /// Returns the kind of this operation.
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Put { .. } => OpKind::Put,
            Self::Get { .. } => OpKind::Get,
        }
    }

    /// Returns the key this operation touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Get { key } => key,
        }
    }
}

/// The ratio between writes and reads of a workload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mix {
    put_ratio: f64,
}

impl Mix {
    /// A workload that only writes.
    pub const WRITE_ONLY: Self = Self { put_ratio: 1.0 };

    /// Creates a mix where each operation is a `PUT` with probability `put_ratio`.
    ///
    /// Returns `None` unless `put_ratio` lies within `[0, 1]`.
    pub fn new(put_ratio: f64) -> Option<Self> {
        (0.0..=1.0)
            .contains(&put_ratio)
            .then_some(Self { put_ratio })
    }

    /// The probability of an operation being a `PUT`.
    pub fn put_ratio(&self) -> f64 {
        self.put_ratio
    }
}

impl Default for Mix {
    fn default() -> Self {
        Self::WRITE_ONLY
    }
}

/// Creates the operation sequence for a run of `total` operations.
///
/// The sequence is fully determined by `(total, mix, seed)`.
pub fn generate(total: u64, mix: Mix, seed: u64) -> OperationSource {
    OperationSource { total, mix, seed }
}

/// A lazy, indexable sequence of [`Operation`]s.
///
/// Operations are indexed `0..len()`. `PUT`s use their index as key and value. `GET`s read the key
/// of a uniformly chosen earlier index, or [`PROBE_KEY`] for index zero.
#[derive(Clone, Debug)]
pub struct OperationSource {
    total: u64,
    mix: Mix,
    seed: u64,
}

impl OperationSource {
    /// The number of operations in this sequence.
    pub fn len(&self) -> u64 {
        self.total
    }

    /// Returns `true` if this sequence contains no operations.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// The seed this sequence was generated with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// The write/read mix of this sequence.
    pub fn mix(&self) -> Mix {
        self.mix
    }

    /// Returns the operation at `index`, or `None` if the index is out of bounds.
    pub fn get(&self, index: u64) -> Option<Operation> {
        (index < self.total).then(|| self.operation_at(index))
    }

    /// Iterates the operations within `range`, clamped to the bounds of the sequence.
    pub fn range(&self, range: Range<u64>) -> impl Iterator<Item = (u64, Operation)> + '_ {
        let end = range.end.min(self.total);
        (range.start..end).map(|index| (index, self.operation_at(index)))
    }

    /// Iterates all operations from the start.
    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.range(0..self.total).map(|(_, op)| op)
    }

    fn operation_at(&self, index: u64) -> Operation {
        let mut rng = SmallRng::seed_from_u64(self.seed ^ index.wrapping_mul(INDEX_MULTIPLIER));

        if rng.random_bool(self.mix.put_ratio) {
            let key = index.to_string();
            return Operation::Put {
                value: key.clone(),
                key,
            };
        }

        let key = match index {
            0 => PROBE_KEY.to_owned(),
            _ => rng.random_range(0..index).to_string(),
        };
        Operation::Get { key }
    }
}
