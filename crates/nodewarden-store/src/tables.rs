//! redb table definitions, one per column family.
//!
//! Keys are row keys; values are JSON-encoded `StoredRow`s.

use redb::TableDefinition;

use crate::types::ColumnFamily;

/// Registry rows keyed by `{cluster}_{datacenter}_{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Lock and choosing rows keyed by `{registry_key}-lock` / `{registry_key}-choosing`.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");

pub(crate) fn table_for(cf: ColumnFamily) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match cf {
        ColumnFamily::Instances => INSTANCES,
        ColumnFamily::Locks => LOCKS,
    }
}
