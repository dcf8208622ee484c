//! Shoe table queries

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use reboot_common::db::{Condition, NewShoe, Rating, ShoeId, ShoeRecord, SizeUnit};
use reboot_common::{Error, Result};

const SHOE_COLUMNS: &str = "id, brand, model, size, size_unit, condition, barcode, rating, \
                            photo_url, qr_code, created_at";

/// Insert one shoe row and return its generated id
pub async fn insert_shoe(pool: &SqlitePool, shoe: &NewShoe) -> Result<ShoeId> {
    let id = Uuid::new_v4();
    let details = &shoe.details;

    sqlx::query(
        r#"
        INSERT INTO shoes (
            id, brand, model, size, size_unit, condition, barcode,
            rating, photo_url, qr_code, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&details.brand)
    .bind(&details.model)
    .bind(&details.size)
    .bind(details.size_unit.as_str())
    .bind(details.condition.as_str())
    .bind(&details.barcode)
    .bind(shoe.rating.map(|r| r.value() as i64))
    .bind(&shoe.photo_url)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn load_shoe(pool: &SqlitePool, id: ShoeId) -> Result<Option<ShoeRecord>> {
    let sql = format!("SELECT {} FROM shoes WHERE id = ?", SHOE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| shoe_from_row(&row)).transpose()
}

/// Store the QR image on a shoe. `NotFound` if the shoe does not exist.
pub async fn update_qr_code(pool: &SqlitePool, id: ShoeId, qr_code: &str) -> Result<()> {
    let result = sqlx::query("UPDATE shoes SET qr_code = ? WHERE id = ?")
        .bind(qr_code)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Shoe {}", id)));
    }
    Ok(())
}

pub async fn count_shoes(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shoes")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Newest first
pub async fn list_recent_shoes(pool: &SqlitePool, limit: u32) -> Result<Vec<ShoeRecord>> {
    let sql = format!(
        "SELECT {} FROM shoes ORDER BY created_at DESC, id LIMIT ?",
        SHOE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(shoe_from_row).collect()
}

fn shoe_from_row(row: &SqliteRow) -> Result<ShoeRecord> {
    let id_str: String = row.get("id");
    let corrupt = |reason: String| Error::CorruptRecord {
        id: id_str.clone(),
        reason,
    };

    let id = Uuid::parse_str(&id_str).map_err(|e| corrupt(format!("id: {}", e)))?;

    let size_unit: String = row.get("size_unit");
    let size_unit = size_unit
        .parse::<SizeUnit>()
        .map_err(|e| corrupt(e.to_string()))?;

    let condition: String = row.get("condition");
    let condition = condition
        .parse::<Condition>()
        .map_err(|e| corrupt(e.to_string()))?;

    let rating: Option<i64> = row.get("rating");
    let rating = rating
        .map(|r| {
            u8::try_from(r)
                .map_err(|_| corrupt(format!("rating {}", r)))
                .and_then(|r| Rating::new(r).map_err(|e| corrupt(e.to_string())))
        })
        .transpose()?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| corrupt(format!("created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(ShoeRecord {
        id,
        brand: row.get("brand"),
        model: row.get("model"),
        size: row.get("size"),
        size_unit,
        condition,
        barcode: row.get("barcode"),
        rating,
        photo_url: row.get("photo_url"),
        qr_code: row.get("qr_code"),
        created_at,
    })
}
