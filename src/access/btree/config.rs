//! Node capacity settings.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::btree_internal_page::INTERNAL_MAX_ENTRIES;
use crate::storage::page::btree_leaf_page::{CELL_POINTER_SIZE, LEAF_HEADER_SIZE};
use crate::storage::page::cell::{CELL_HEADER_SIZE, KEY_SIZE};
use crate::storage::PAGE_SIZE;

pub const LEAF_MAX_CELLS: usize = 3;
pub const INTERNAL_MAX_KEYS: usize = 3;

/// Capacities are counts, not byte budgets: a leaf splits once it holds
/// `leaf_max_cells` cells and an internal node once it would exceed
/// `internal_max_keys` separators. The configuration is not stored in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeConfig {
    pub leaf_max_cells: usize,
    pub internal_max_keys: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            leaf_max_cells: LEAF_MAX_CELLS,
            internal_max_keys: INTERNAL_MAX_KEYS,
        }
    }
}

impl BTreeConfig {
    pub fn new(leaf_max_cells: usize, internal_max_keys: usize) -> StorageResult<Self> {
        let config = Self {
            leaf_max_cells,
            internal_max_keys,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.leaf_max_cells < 2 {
            return Err(StorageError::InvalidConfig(format!(
                "leaf_max_cells must be at least 2, got {}",
                self.leaf_max_cells
            )));
        }
        if self.internal_max_keys < 2 {
            return Err(StorageError::InvalidConfig(format!(
                "internal_max_keys must be at least 2, got {}",
                self.internal_max_keys
            )));
        }

        let per_cell = (PAGE_SIZE - LEAF_HEADER_SIZE) / self.leaf_max_cells;
        if per_cell < CELL_POINTER_SIZE + CELL_HEADER_SIZE + KEY_SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "{} cells per leaf leave no room for a cell",
                self.leaf_max_cells
            )));
        }
        if self.internal_max_keys > INTERNAL_MAX_ENTRIES {
            return Err(StorageError::InvalidConfig(format!(
                "internal_max_keys {} exceeds page capacity {}",
                self.internal_max_keys, INTERNAL_MAX_ENTRIES
            )));
        }

        Ok(())
    }

    /// Fewest cells a non-root leaf may hold after a delete.
    pub fn leaf_min_cells(&self) -> usize {
        (self.leaf_max_cells / 2).max(1)
    }

    /// Fewest separators a non-root internal node may hold after a delete.
    pub fn internal_min_keys(&self) -> usize {
        (self.internal_max_keys / 2).max(1)
    }

    /// Largest framed cell accepted by insert. A leaf below `leaf_max_cells`
    /// always has room for one more cell of this size.
    pub fn max_cell_size(&self) -> usize {
        (PAGE_SIZE - LEAF_HEADER_SIZE) / self.leaf_max_cells - CELL_POINTER_SIZE
    }
}
