pub mod access;
pub mod catalog;
pub mod database;
pub mod storage;
