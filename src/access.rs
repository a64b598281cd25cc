//! Access layer: the B+-tree that stores a table's cells in key order.
//!
//! - **BTree**: find/insert/update/delete over pages addressed by number
//! - **Cursor**: ascending traversal across leaf pages
//! - **BTreeConfig**: node capacities shared by every tree in a file

pub mod btree;

pub use btree::{BTree, BTreeConfig, Cursor};
