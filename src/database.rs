use crate::access::{BTree, BTreeConfig};
use crate::catalog::{Catalog, TableId, TableInfo, TableSchema};
use crate::storage::page::cell::{self, Cell, Key};
use crate::storage::Pager;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

/// High-level database interface: one file, one catalog, one tree per table.
pub struct Database {
    pager: Pager,
    catalog: Catalog,
    config: BTreeConfig,
}

impl Database {
    /// Open the database at `path`, creating the file and its catalog if needed.
    pub fn open(path: &Path, config: BTreeConfig) -> Result<Self> {
        config.validate()?;
        let pager = Pager::open(path).with_context(|| format!("Failed to open {:?}", path))?;

        let catalog = match pager.catalog_root() {
            Some(_) => Catalog::open(pager.clone(), config)?,
            None => {
                info!("initializing new database at {:?}", path);
                Catalog::create(pager.clone(), config)?
            }
        };

        Ok(Self {
            pager,
            catalog,
            config,
        })
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Create an empty table backed by a new tree.
    pub fn create_table(&mut self, name: &str, schema: Option<TableSchema>) -> Result<TableId> {
        if self.catalog.get_table(name).is_some() {
            anyhow::bail!("Table '{}' already exists", name);
        }

        let tree = BTree::new_tree(self.pager.clone(), self.config)?;
        let table_id = self.catalog.add_table(name, tree.root_page_num(), schema)?;
        info!("created table '{}' at page {}", name, tree.root_page_num());
        Ok(table_id)
    }

    /// Open the tree backing a table.
    pub fn open_table(&self, name: &str) -> Result<BTree> {
        let root = self.catalog.get_root_page_num(name)?;
        BTree::open(self.pager.clone(), root, self.config)
            .with_context(|| format!("Failed to open table '{}'", name))
    }

    pub fn insert(&mut self, table: &str, key: Key, data: &[u8]) -> Result<()> {
        let mut tree = self.open_table(table)?;
        tree.insert(Cell::new(key, data).as_bytes())
            .with_context(|| format!("Failed to insert key {} into '{}'", key, table))?;
        self.record_root(table, &tree)
    }

    /// Data portion of the row stored under `key`.
    pub fn get(&self, table: &str, key: Key) -> Result<Option<Vec<u8>>> {
        let tree = self.open_table(table)?;
        match tree.get(key)? {
            Some(bytes) => Ok(Some(cell::data_of(&bytes)?.to_vec())),
            None => Ok(None),
        }
    }

    pub fn delete(&mut self, table: &str, key: Key) -> Result<bool> {
        let mut tree = self.open_table(table)?;
        let deleted = tree.delete(key)?;
        self.record_root(table, &tree)?;
        Ok(deleted)
    }

    /// Every row of a table in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(Key, Vec<u8>)>> {
        let tree = self.open_table(table)?;
        let mut rows = Vec::new();
        for cell in tree.cursor()? {
            let cell = Cell::from_bytes(cell?)?;
            rows.push((cell.key(), cell.data().to_vec()));
        }
        Ok(rows)
    }

    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.catalog.get_all_tables()
    }

    /// Schema line followed by the page layout of the table's tree.
    pub fn describe_table(&self, name: &str) -> Result<String> {
        let tree = self.open_table(name)?;
        let mut out = match self.catalog.get_schema(name) {
            Some(schema) => format!("{}\n", schema),
            None => format!("{} (no schema)\n", name),
        };
        out.push_str(&tree.describe()?);
        Ok(out)
    }

    /// Force every written page to disk.
    pub fn flush(&self) -> Result<()> {
        self.pager.flush()?;
        Ok(())
    }

    fn record_root(&mut self, table: &str, tree: &BTree) -> Result<()> {
        if self.catalog.get_root_page_num(table)? != tree.root_page_num() {
            self.catalog.set_root_page_num(table, tree.root_page_num())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnInfo, DataType};
    use crate::storage::page::PageId;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_use_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(&dir.path().join("test.db"), BTreeConfig::default())?;

        db.create_table("users", None)?;
        db.insert("users", 2, b"bob")?;
        db.insert("users", 1, b"alice")?;
        db.insert("users", 3, b"carol")?;

        assert_eq!(db.get("users", 1)?, Some(b"alice".to_vec()));
        assert_eq!(db.get("users", 9)?, None);
        assert_eq!(
            db.scan("users")?,
            vec![
                (1, b"alice".to_vec()),
                (2, b"bob".to_vec()),
                (3, b"carol".to_vec())
            ]
        );

        assert!(db.delete("users", 2)?);
        assert!(!db.delete("users", 2)?);
        assert_eq!(db.scan("users")?.len(), 2);

        Ok(())
    }

    #[test]
    fn test_unknown_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(&dir.path().join("test.db"), BTreeConfig::default())?;

        assert!(db.insert("missing", 1, b"x").is_err());
        assert!(db.scan("missing").is_err());
        assert!(db.create_table("t", None).is_ok());
        assert!(db.create_table("t", None).is_err());

        Ok(())
    }

    #[test]
    fn test_root_moves_are_recorded() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(&dir.path().join("test.db"), BTreeConfig::default())?;
        db.create_table("numbers", None)?;
        let initial_root = db.catalog().get_root_page_num("numbers")?;

        for key in 1..=20 {
            db.insert("numbers", key, format!("n{}", key).as_bytes())?;
        }
        let grown_root = db.catalog().get_root_page_num("numbers")?;
        assert_ne!(grown_root, initial_root);
        assert_eq!(db.open_table("numbers")?.root_page_num(), grown_root);

        for key in 1..=20 {
            db.delete("numbers", key)?;
        }
        let root = db.catalog().get_root_page_num("numbers")?;
        assert_eq!(db.open_table("numbers")?.height()?, 1);
        assert_ne!(root, grown_root);

        Ok(())
    }

    #[test]
    fn test_describe_table() -> Result<()> {
        let dir = tempdir()?;
        let mut db = Database::open(&dir.path().join("test.db"), BTreeConfig::default())?;
        let schema = TableSchema::new(
            "users",
            vec![
                ColumnInfo::new("id", DataType::Integer, true),
                ColumnInfo::new("name", DataType::Text, false),
            ],
        );
        db.create_table("users", Some(schema))?;
        db.insert("users", 1, b"alice")?;

        let text = db.describe_table("users")?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("users (id INTEGER PRIMARY KEY, name TEXT)"));
        assert_eq!(lines.next(), Some("leaf 1 keys=[1]"));

        let tables = db.list_tables()?;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].root_page_num, PageId(1));

        Ok(())
    }
}
