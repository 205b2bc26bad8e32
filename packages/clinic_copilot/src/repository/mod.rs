// Repository layer: each domain lives in its own file with `impl CrmRepository`.
//
// All persistence goes through this struct so handlers and the ingestion
// pipeline never touch SQL directly.

use sqlx::sqlite::SqlitePool;

mod instances;
mod leads;
mod messages;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use leads::MaterializedLead;

#[derive(Clone)]
pub struct CrmRepository {
    pub(crate) pool: SqlitePool,
}

impl CrmRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
