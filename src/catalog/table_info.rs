//! Table information and metadata structures.

use crate::catalog::column_info::TableSchema;
use crate::storage::page::cell::{self, Cell};
use crate::storage::page::PageId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// One catalog row. The table id is the row's tree key; the whole record is
/// the bincode-encoded data portion of the cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: TableId,
    pub table_name: String,
    pub root_page_num: PageId,
    pub schema: Option<TableSchema>,
}

impl TableInfo {
    pub fn to_cell(&self) -> Result<Cell> {
        let data = bincode::serialize(self)
            .with_context(|| format!("Failed to encode catalog row for '{}'", self.table_name))?;
        Ok(Cell::new(self.table_id.0, &data))
    }

    pub fn from_cell(bytes: &[u8]) -> Result<Self> {
        let key = cell::key_of(bytes)?;
        let info: TableInfo = bincode::deserialize(cell::data_of(bytes)?)
            .with_context(|| format!("Failed to decode catalog row {}", key))?;
        if info.table_id.0 != key {
            anyhow::bail!(
                "Catalog row keyed {} carries table id {}",
                key,
                info.table_id.0
            );
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::column_info::{ColumnInfo, DataType};

    #[test]
    fn test_table_info_cell() -> Result<()> {
        let info = TableInfo {
            table_id: TableId(42),
            table_name: "test_table".to_string(),
            root_page_num: PageId(123),
            schema: Some(TableSchema::new(
                "test_table",
                vec![ColumnInfo::new("id", DataType::Integer, true)],
            )),
        };

        let cell = info.to_cell()?;
        assert_eq!(cell.key(), 42);
        assert_eq!(TableInfo::from_cell(cell.as_bytes())?, info);

        Ok(())
    }

    #[test]
    fn test_mismatched_key_rejected() -> Result<()> {
        let info = TableInfo {
            table_id: TableId(1),
            table_name: "t".to_string(),
            root_page_num: PageId(0),
            schema: None,
        };
        let forged = Cell::new(2, info.to_cell()?.data());
        assert!(TableInfo::from_cell(forged.as_bytes()).is_err());

        Ok(())
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let cell = Cell::new(1, &[0xFF; 3]);
        assert!(TableInfo::from_cell(cell.as_bytes()).is_err());
    }
}
