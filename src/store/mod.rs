//! The narrow backing-store surface the backup engine consumes.
//!
//! The export side only reads (`fetch_all`). The import side opens one
//! [`UnitOfWork`] per table kind, inserts rows through it one at a time and
//! commits once at the end of the table. A failed insert must leave the unit
//! usable for the rows that follow it.

use async_trait::async_trait;

use crate::model::{Record, TableKind};
use crate::AppResult;

mod sqlite;

pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Every current row of one table kind, ordered by primary key.
    async fn fetch_all(&self, kind: TableKind) -> AppResult<Vec<Record>>;

    /// Open the unit of work used to replay one table kind.
    async fn begin(&self, kind: TableKind) -> AppResult<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Insert a row, ignoring any primary key it carries. Returns the
    /// identifier assigned by the store, `None` for junction rows.
    async fn insert(&mut self, record: &Record) -> AppResult<Option<i64>>;

    /// Insert a row keeping the key it carries. An existing row with the same
    /// key is overwritten; duplicate junction rows are ignored.
    async fn upsert(&mut self, record: &Record) -> AppResult<()>;

    async fn commit(&mut self) -> AppResult<()>;
}
