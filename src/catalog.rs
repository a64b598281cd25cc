//! System catalog: a B+-tree of table descriptions.
//!
//! Each row maps a table id to the table's name, current root page and
//! optional schema. The catalog tree's own root is kept in the file header so
//! it can be found again after reopening, even after it moves on a split.

pub mod column_info;
pub mod table_info;

pub use column_info::{ColumnInfo, DataType, TableSchema};
pub use table_info::{TableId, TableInfo};

use crate::access::{BTree, BTreeConfig};
use crate::storage::page::PageId;
use crate::storage::Pager;
use anyhow::{bail, Context, Result};
use log::debug;
use std::collections::HashMap;

pub struct Catalog {
    tree: BTree,
    pager: Pager,
    table_cache: HashMap<String, TableInfo>,
    next_table_id: TableId,
}

impl Catalog {
    /// Create an empty catalog tree and record its root in the file header.
    pub fn create(pager: Pager, config: BTreeConfig) -> Result<Self> {
        let tree = BTree::new_tree(pager.clone(), config).context("Failed to create catalog tree")?;
        pager.set_catalog_root(tree.root_page_num())?;
        debug!("created catalog at page {}", tree.root_page_num());

        Ok(Self {
            tree,
            pager,
            table_cache: HashMap::new(),
            next_table_id: TableId(1),
        })
    }

    /// Open the catalog recorded in the file header and load every row.
    pub fn open(pager: Pager, config: BTreeConfig) -> Result<Self> {
        let root = pager
            .catalog_root()
            .context("Database file has no catalog root")?;
        let tree = BTree::open(pager.clone(), root, config).context("Failed to open catalog tree")?;

        let mut catalog = Self {
            tree,
            pager,
            table_cache: HashMap::new(),
            next_table_id: TableId(1),
        };

        for info in catalog.get_all_tables()? {
            if info.table_id >= catalog.next_table_id {
                catalog.next_table_id = TableId(info.table_id.0 + 1);
            }
            catalog.table_cache.insert(info.table_name.clone(), info);
        }
        debug!(
            "opened catalog at page {} with {} tables",
            root,
            catalog.table_cache.len()
        );

        Ok(catalog)
    }

    pub fn root_page_num(&self) -> PageId {
        self.tree.root_page_num()
    }

    /// Register a table. Names are unique.
    pub fn add_table(
        &mut self,
        name: &str,
        root_page_num: PageId,
        schema: Option<TableSchema>,
    ) -> Result<TableId> {
        if self.table_cache.contains_key(name) {
            bail!("Table '{}' already exists", name);
        }

        let info = TableInfo {
            table_id: self.next_table_id,
            table_name: name.to_string(),
            root_page_num,
            schema,
        };
        self.tree
            .insert(info.to_cell()?.as_bytes())
            .with_context(|| format!("Failed to add table '{}'", name))?;
        self.sync_root()?;

        self.next_table_id = TableId(info.table_id.0 + 1);
        let table_id = info.table_id;
        self.table_cache.insert(name.to_string(), info);
        debug!("added table '{}' (id {}) at page {}", name, table_id.0, root_page_num);

        Ok(table_id)
    }

    pub fn get_table(&self, name: &str) -> Option<TableInfo> {
        self.table_cache.get(name).cloned()
    }

    /// Every catalog row in table id order, read from the tree.
    pub fn get_all_tables(&self) -> Result<Vec<TableInfo>> {
        let mut tables = Vec::new();
        for cell in self.tree.cursor()? {
            tables.push(TableInfo::from_cell(&cell?)?);
        }
        Ok(tables)
    }

    pub fn get_schema(&self, name: &str) -> Option<TableSchema> {
        self.table_cache.get(name).and_then(|info| info.schema.clone())
    }

    pub fn get_root_page_num(&self, name: &str) -> Result<PageId> {
        match self.table_cache.get(name) {
            Some(info) => Ok(info.root_page_num),
            None => bail!("Table '{}' does not exist", name),
        }
    }

    /// Record a new root page for `name` after its tree grew or shrank.
    pub fn set_root_page_num(&mut self, name: &str, root_page_num: PageId) -> Result<()> {
        let mut info = match self.table_cache.get(name) {
            Some(info) => info.clone(),
            None => bail!("Table '{}' does not exist", name),
        };
        if info.root_page_num == root_page_num {
            return Ok(());
        }

        info.root_page_num = root_page_num;
        if !self.tree.update(info.table_id.0, info.to_cell()?.as_bytes())? {
            bail!("Catalog row for table '{}' is missing", name);
        }
        self.sync_root()?;
        debug!("table '{}' root moved to page {}", name, root_page_num);

        self.table_cache.insert(name.to_string(), info);
        Ok(())
    }

    fn sync_root(&self) -> Result<()> {
        self.pager.set_catalog_root(self.tree.root_page_num())?;
        Ok(())
    }
}
