//! kdb - command line access to a single-file B+-tree database

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kdb::access::BTreeConfig;
use kdb::access::btree::config::{INTERNAL_MAX_KEYS, LEAF_MAX_CELLS};
use kdb::database::Database;
use kdb::storage::page::cell::Key;
use std::path::PathBuf;

/// kdb - a paged B+-tree storage engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file
    #[arg(long, default_value = "kdb.db")]
    db: PathBuf,

    /// Table to operate on (created on first insert)
    #[arg(short, long, default_value = "main")]
    table: String,

    /// Cells per leaf before it splits
    #[arg(long, default_value_t = LEAF_MAX_CELLS)]
    leaf_max_cells: usize,

    /// Separators per internal node before it splits
    #[arg(long, default_value_t = INTERNAL_MAX_KEYS)]
    internal_max_keys: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value under a key
    Insert { key: Key, value: String },
    /// Print the value stored under a key
    Get { key: Key },
    /// Remove a key
    Delete { key: Key },
    /// Print every row in key order
    Scan,
    /// List tables and their root pages
    Tables,
    /// Print the page layout of the table's tree
    Dump,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = BTreeConfig::new(args.leaf_max_cells, args.internal_max_keys)
        .context("Invalid tree configuration")?;
    let mut db = Database::open(&args.db, config)
        .with_context(|| format!("Failed to open database at {}", args.db.display()))?;

    match args.command {
        Command::Insert { key, value } => {
            if db.catalog().get_table(&args.table).is_none() {
                db.create_table(&args.table, None)?;
            }
            db.insert(&args.table, key, value.as_bytes())?;
            println!("inserted {}", key);
        }
        Command::Get { key } => match db.get(&args.table, key)? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("key {} not found", key),
        },
        Command::Delete { key } => {
            if db.delete(&args.table, key)? {
                println!("deleted {}", key);
            } else {
                println!("key {} not found", key);
            }
        }
        Command::Scan => {
            for (key, value) in db.scan(&args.table)? {
                println!("{}\t{}", key, String::from_utf8_lossy(&value));
            }
        }
        Command::Tables => {
            for table in db.list_tables()? {
                println!(
                    "{}\t{}\troot={}",
                    table.table_id.0, table.table_name, table.root_page_num
                );
            }
        }
        Command::Dump => print!("{}", db.describe_table(&args.table)?),
    }

    db.flush()?;
    Ok(())
}
