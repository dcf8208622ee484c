//! Record writer
//!
//! [`RecordStore`] is the seam between the submission pipeline and the
//! relational store. The writer makes a single call per operation and does
//! not retry; retry eligibility is decided by the orchestrator.

use async_trait::async_trait;
use sqlx::SqlitePool;

use reboot_common::db::{NewShoe, ShoeId, ShoeRecord};
use reboot_common::Result;

use crate::db::shoes;

/// Persistent shoe records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record and return its generated id
    async fn insert(&self, shoe: &NewShoe) -> Result<ShoeId>;

    async fn get(&self, id: ShoeId) -> Result<Option<ShoeRecord>>;

    /// Attach a QR image (data URI) to an existing record
    async fn set_qr_code(&self, id: ShoeId, qr_code: &str) -> Result<()>;

    /// Aggregate count of all records
    async fn count(&self) -> Result<i64>;

    /// Most recently created records first
    async fn list_recent(&self, limit: u32) -> Result<Vec<ShoeRecord>>;
}

/// [`RecordStore`] on the SQLite `shoes` table
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert(&self, shoe: &NewShoe) -> Result<ShoeId> {
        let id = shoes::insert_shoe(&self.pool, shoe).await?;
        tracing::info!(shoe_id = %id, brand = %shoe.details.brand, "Shoe record created");
        Ok(id)
    }

    async fn get(&self, id: ShoeId) -> Result<Option<ShoeRecord>> {
        shoes::load_shoe(&self.pool, id).await
    }

    async fn set_qr_code(&self, id: ShoeId, qr_code: &str) -> Result<()> {
        shoes::update_qr_code(&self.pool, id, qr_code).await
    }

    async fn count(&self) -> Result<i64> {
        shoes::count_shoes(&self.pool).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ShoeRecord>> {
        shoes::list_recent_shoes(&self.pool, limit).await
    }
}
