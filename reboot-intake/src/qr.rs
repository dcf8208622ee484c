//! QR issuance for shoe records
//!
//! The QR payload is `SHOE:<uuid>`. Scanning a label and passing the decoded
//! text to [`parse_shoe_qr_data`] yields the record id again.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use reboot_common::db::ShoeId;
use reboot_common::events::{EventBus, ReBootEvent};

use crate::records::RecordStore;

/// Prefix of every shoe QR payload
pub const SHOE_QR_PREFIX: &str = "SHOE:";

/// Largest rendered edge, in pixels
pub const QR_MAX_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR generation failed: {0}")]
    Render(String),

    #[error("QR could not be saved: {0}")]
    Persist(#[from] reboot_common::Error),
}

/// QR payload for a shoe
pub fn generate_shoe_qr_data(id: ShoeId) -> String {
    format!("{}{}", SHOE_QR_PREFIX, id)
}

/// Inverse of [`generate_shoe_qr_data`]; `None` for foreign codes
pub fn parse_shoe_qr_data(text: &str) -> Option<ShoeId> {
    text.trim()
        .strip_prefix(SHOE_QR_PREFIX)
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
}

/// Render `payload` as a PNG data URI, error-correction level M
pub fn render_qr_data_uri(payload: &str) -> Result<String, QrError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| QrError::Render(e.to_string()))?;

    let raster = code
        .render::<Luma<u8>>()
        .max_dimensions(QR_MAX_SIZE, QR_MAX_SIZE)
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(raster)
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| QrError::Render(e.to_string()))?;

    Ok(format!("data:image/png;base64,{}", BASE64.encode(png.into_inner())))
}

/// Generates a record's QR image and stores it on the record
#[derive(Clone)]
pub struct QrIssuer {
    records: Arc<dyn RecordStore>,
    event_bus: EventBus,
}

impl QrIssuer {
    pub fn new(records: Arc<dyn RecordStore>, event_bus: EventBus) -> Self {
        Self { records, event_bus }
    }

    /// Render and persist the QR for `id`; returns the stored data URI
    pub async fn issue(&self, id: ShoeId) -> Result<String, QrError> {
        let qr_code = render_qr_data_uri(&generate_shoe_qr_data(id))?;
        self.records.set_qr_code(id, &qr_code).await?;

        tracing::info!(shoe_id = %id, "QR code issued");
        self.event_bus.emit_lossy(ReBootEvent::ShoeQrIssued {
            shoe_id: id,
            timestamp: Utc::now(),
        });

        Ok(qr_code)
    }
}
