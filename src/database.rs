//! Database initialization and table definitions
//!
//! This module handles the setup and configuration of the embedded redb database.
//! It defines the database tables and provides initialization functions.

use redb::{Database, TableDefinition};
use std::sync::Arc;

/// Main table for profiles
///
/// Key: profile id (UUID as string)
/// Value: JSON-serialized Profile
pub const TABLE_PROFILES: TableDefinition<&str, &str> = TableDefinition::new("profiles_v1");

/// Index table mapping claimed usernames to profile ids
///
/// Key: username (already normalized to lowercase)
/// Value: profile id as string
///
/// This table is the global username uniqueness backstop: a username is
/// taken iff its key exists here.
pub const TABLE_USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames_v1");

/// Main table for content blocks
///
/// Key: block id (UUID as string)
/// Value: JSON-serialized Block
pub const TABLE_BLOCKS: TableDefinition<&str, &str> = TableDefinition::new("blocks_v1");

/// Index table for querying blocks by owner
///
/// Key: composite key in format "{owner_id}:{block_id}"
/// Value: block id as string
///
/// Range-scanning "{owner_id}:" .. "{owner_id}:{" yields every block id
/// belonging to that owner; the records themselves live in TABLE_BLOCKS.
pub const TABLE_BLOCK_OWNER: TableDefinition<&str, &str> = TableDefinition::new("block_owner_v1");

/// Index table enforcing per-owner slug uniqueness
///
/// Key: composite key in format "{owner_id}:{slug}"
/// Value: block id as string
///
/// A slug is available for an owner iff the composite key is absent. The
/// availability resolver probes this table, and slug assignment inserts
/// here within the same write transaction, so probe-then-assign cannot
/// race against another assignment.
pub const TABLE_BLOCK_SLUGS: TableDefinition<&str, &str> = TableDefinition::new("block_slugs_v1");

/// Main table for collections
///
/// Key: collection id (UUID as string)
/// Value: JSON-serialized Collection
pub const TABLE_COLLECTIONS: TableDefinition<&str, &str> = TableDefinition::new("collections_v1");

/// Index table for querying collections by owner
///
/// Key: composite key in format "{owner_id}:{collection_id}"
/// Value: collection id as string
pub const TABLE_COLLECTION_OWNER: TableDefinition<&str, &str> =
    TableDefinition::new("collection_owner_v1");

/// Application state shared across all request handlers
///
/// Wraps the database instance in an Arc for thread-safe sharing across
/// async handlers in the Axum web framework.
#[derive(Clone)]
pub struct AppState {
    /// Thread-safe reference to the embedded database
    pub db: Arc<Database>,
}

/// Builds the composite key used by the owner and slug index tables.
pub fn scoped_key(scope: &str, suffix: &str) -> String {
    format!("{}:{}", scope, suffix)
}

/// Range bounds covering every index entry for a scope.
///
/// start: "{scope}:" - matches all entries under this scope
/// end:   "{scope}:{" - '{' sorts immediately after ':', giving an
/// exclusive upper bound for the scan.
pub fn scope_range(scope: &str) -> (String, String) {
    (format!("{}:", scope), format!("{}:{{", scope))
}

/// Initializes the embedded database and creates required tables
///
/// This function:
/// 1. Creates or opens the database file at the specified path
/// 2. Opens every table so it exists before the first request
/// 3. Commits the transaction to ensure tables are persisted
///
/// # Arguments
///
/// * `db_path` - File path where the database should be stored (e.g., "humans.db")
///
/// # Returns
///
/// * `Ok(Database)` - Successfully initialized database instance
/// * `Err(redb::Error)` - Database initialization error
pub fn init_db(db_path: &str) -> Result<Database, redb::Error> {
    // Create or open the database file
    let db = Database::create(db_path)?;

    // Begin a write transaction to create tables
    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_PROFILES)?;
        write_txn.open_table(TABLE_USERNAMES)?;
        write_txn.open_table(TABLE_BLOCKS)?;
        write_txn.open_table(TABLE_BLOCK_OWNER)?;
        write_txn.open_table(TABLE_BLOCK_SLUGS)?;
        write_txn.open_table(TABLE_COLLECTIONS)?;
        write_txn.open_table(TABLE_COLLECTION_OWNER)?;
    }

    // Commit the transaction to persist the table structures
    write_txn.commit()?;

    Ok(db)
}
