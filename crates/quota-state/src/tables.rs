//! redb table definitions for the snapshot store.
//!
//! Keys are pool ids, values are JSON-serialized `PoolSnapshot`s.

use redb::TableDefinition;

/// Post-pass pool snapshots keyed by `{pool_id}`.
pub const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
