//! Identity type for datasets.
//!
//! `DatasetId` is a newtype over `u32` that serves as a direct index into
//! the experiment index arena. Identity never changes when a dataset is
//! renamed, so the iteration machinery tracks datasets by id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into `ExperimentIndex::datasets`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DatasetId(pub u32);

impl DatasetId {
    pub const INVALID: DatasetId = DatasetId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "DatasetId(INVALID)")
        } else {
            write!(f, "DatasetId({})", self.0)
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_id() {
        let id = DatasetId(42);
        assert!(id.is_valid());
        assert_eq!(id.index(), 42);
        assert!(!DatasetId::INVALID.is_valid());
        assert_eq!(format!("{}", DatasetId::INVALID), "DatasetId(INVALID)");
    }
}
