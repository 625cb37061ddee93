//! Static assignment of files to workers
//!
//! Each worker owns the files whose name hashes (xxHash64, seed 0) to its
//! index modulo the worker count. The hash covers the file *name* only, so a
//! file keeps its owner wherever it sits below the input root. There is no
//! rebalancing: changing `task_count` reshuffles ownership wholesale.

use spool_common::{Result, SpoolError};
use twox_hash::XxHash64;

use crate::config::{PartitionStrategy, SpoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPredicate {
    task_index: u32,
    task_count: u32,
}

impl PartitionPredicate {
    pub fn new(task_index: u32, task_count: u32, strategy: PartitionStrategy) -> Result<Self> {
        if task_count == 0 || task_index >= task_count {
            return Err(SpoolError::config(format!(
                "invalid task layout: index {} of {}",
                task_index, task_count
            )));
        }
        if strategy == PartitionStrategy::None && task_count > 1 {
            return Err(SpoolError::config(
                "partition strategy 'none' only supports a single worker",
            ));
        }
        Ok(Self {
            task_index,
            task_count,
        })
    }

    pub fn from_config(config: &SpoolConfig) -> Result<Self> {
        Self::new(config.task_index, config.task_count, config.task_partitioner)
    }

    /// True when this worker is responsible for `file_name`
    pub fn owns(&self, file_name: &str) -> bool {
        self.task_count == 1 || owner_of(file_name, self.task_count) == self.task_index
    }

    pub fn task_index(&self) -> u32 {
        self.task_index
    }

    pub fn task_count(&self) -> u32 {
        self.task_count
    }
}

/// Worker index owning `file_name` among `task_count` workers
pub fn owner_of(file_name: &str, task_count: u32) -> u32 {
    let hash = XxHash64::oneshot(0, file_name.as_bytes());
    (hash % u64::from(task_count)) as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_worker_owns_everything() {
        let p = PartitionPredicate::new(0, 1, PartitionStrategy::None).unwrap();
        assert!(p.owns("users0.csv"));
        assert!(p.owns(""));
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        assert!(PartitionPredicate::new(0, 0, PartitionStrategy::ByName).is_err());
        assert!(PartitionPredicate::new(2, 2, PartitionStrategy::ByName).is_err());
        assert!(PartitionPredicate::new(0, 2, PartitionStrategy::None).is_err());
    }

    #[test]
    fn test_known_hash_value() {
        // xxHash64 of the empty input with seed 0
        assert_eq!(XxHash64::oneshot(0, b""), 0xEF46_DB37_51D8_E999);
        assert_eq!(owner_of("", 2), (0xEF46_DB37_51D8_E999u64 % 2) as u32);
    }

    #[test]
    fn test_files_spread_across_workers() {
        let count = 4;
        let mut seen = [0usize; 4];
        for i in 0..200 {
            seen[owner_of(&format!("users{}.csv", i), count) as usize] += 1;
        }
        assert!(seen.iter().all(|&n| n > 0), "uneven spread: {:?}", seen);
    }

    proptest! {
        #[test]
        fn prop_exactly_one_owner(name in "[a-zA-Z0-9_.-]{0,40}", count in 1u32..16) {
            let owners = (0..count)
                .filter(|&i| {
                    PartitionPredicate::new(i, count, PartitionStrategy::ByName)
                        .unwrap()
                        .owns(&name)
                })
                .count();
            prop_assert_eq!(owners, 1);
        }

        #[test]
        fn prop_owner_is_stable(name in ".{0,64}", count in 1u32..64) {
            prop_assert_eq!(owner_of(&name, count), owner_of(&name, count));
            prop_assert!(owner_of(&name, count) < count);
        }
    }
}
