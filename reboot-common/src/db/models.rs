//! Shoe domain models
//!
//! `ShoeDetails` is what the details form produces; `ShoeRecord` is the
//! persisted row. A record is only ever built from validated details plus an
//! uploaded photo URL (see [`NewShoe`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Identifier of a persisted shoe
pub type ShoeId = Uuid;

/// Unit the `size` field is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnit {
    US,
    UK,
    EU,
    CM,
}

impl SizeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeUnit::US => "US",
            SizeUnit::UK => "UK",
            SizeUnit::EU => "EU",
            SizeUnit::CM => "CM",
        }
    }
}

impl FromStr for SizeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "US" => Ok(SizeUnit::US),
            "UK" => Ok(SizeUnit::UK),
            "EU" => Ok(SizeUnit::EU),
            "CM" => Ok(SizeUnit::CM),
            other => Err(Error::InvalidInput(format!("Unknown size unit: {}", other))),
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wear condition of a donated shoe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::New => "new",
            Condition::LikeNew => "like_new",
            Condition::Good => "good",
            Condition::Fair => "fair",
            Condition::Poor => "poor",
        }
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(Condition::New),
            "like_new" => Ok(Condition::LikeNew),
            "good" => Ok(Condition::Good),
            "fair" => Ok(Condition::Fair),
            "poor" => Ok(Condition::Poor),
            other => Err(Error::InvalidInput(format!("Unknown condition: {}", other))),
        }
    }
}

/// User rating of a shoe, 1-10 inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidInput(format!(
                "Rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> u8 {
        rating.0
    }
}

/// Structured form data collected by the details screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoeDetails {
    pub brand: String,
    #[serde(default)]
    pub model: Option<String>,
    pub size: String,
    pub size_unit: SizeUnit,
    pub condition: Condition,
    /// Decoded barcode text, if the user scanned one
    #[serde(default)]
    pub barcode: Option<String>,
}

impl ShoeDetails {
    /// Check the fields a record cannot be created without
    pub fn validate(&self) -> Result<()> {
        if self.brand.trim().is_empty() {
            return Err(Error::InvalidInput("Brand is required".to_string()));
        }
        if self.size.trim().is_empty() {
            return Err(Error::InvalidInput("Size is required".to_string()));
        }
        Ok(())
    }

    /// Copy with surrounding whitespace removed and blank optionals dropped
    pub fn normalized(&self) -> Self {
        fn non_blank(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }

        Self {
            brand: self.brand.trim().to_string(),
            model: non_blank(&self.model),
            size: self.size.trim().to_string(),
            size_unit: self.size_unit,
            condition: self.condition,
            barcode: non_blank(&self.barcode),
        }
    }
}

/// Everything needed to insert a shoe row
#[derive(Debug, Clone, PartialEq)]
pub struct NewShoe {
    pub details: ShoeDetails,
    pub rating: Option<Rating>,
    pub photo_url: String,
}

impl NewShoe {
    /// Build from validated details; rejects an empty photo URL
    pub fn new(details: ShoeDetails, rating: Option<Rating>, photo_url: String) -> Result<Self> {
        details.validate()?;
        if photo_url.trim().is_empty() {
            return Err(Error::InvalidInput("Photo URL is required".to_string()));
        }
        Ok(Self {
            details: details.normalized(),
            rating,
            photo_url,
        })
    }
}

/// Persisted shoe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoeRecord {
    pub id: ShoeId,
    pub brand: String,
    pub model: Option<String>,
    pub size: String,
    pub size_unit: SizeUnit,
    pub condition: Condition,
    pub barcode: Option<String>,
    pub rating: Option<Rating>,
    pub photo_url: String,
    /// PNG data URI; `None` until issued
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
}
