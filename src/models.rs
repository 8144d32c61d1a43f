//! Data models for the collaborative grid.
//!
//! This module contains the row record shown in the grid, the column
//! configuration, session identifiers and the persisted session metadata.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Key under which the whole row collection is stored in the shared document.
pub const GRID_DATA_KEY: &str = "gridData";

// ============================================================================
// Row Record
// ============================================================================

/// One entry of the grid. Rows have no identity beyond their position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OlympicRow {
    pub athlete: String,
    pub age: u32,
    pub country: String,
    pub year: u32,
    pub date: String,
    pub sport: String,
    pub gold: u32,
    pub silver: u32,
    pub bronze: u32,
    pub total: u32,
}

/// The full row collection, always written and read as one unit.
pub type GridSnapshot = Vec<OlympicRow>;

impl OlympicRow {
    /// Read a single field as JSON, by its serialized name.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self).ok()? {
            serde_json::Value::Object(map) => map.get(name).cloned(),
            _ => None,
        }
    }

    /// Return a copy of this row with `name` set to `value`.
    /// Fails if the value does not fit the field's type.
    pub fn with_field(&self, name: &str, value: serde_json::Value) -> Result<OlympicRow> {
        let mut json = serde_json::to_value(self)?;
        if let serde_json::Value::Object(ref mut map) = json {
            map.insert(name.to_string(), value);
        }
        Ok(serde_json::from_value(json)?)
    }
}

/// Serialize a snapshot into the single value stored in the shared document.
pub fn encode_snapshot(rows: &[OlympicRow]) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(rows)?)
}

/// Decode a shared-document value back into rows.
pub fn decode_snapshot(value: &serde_json::Value) -> Result<GridSnapshot> {
    Ok(serde_json::from_value(value.clone())?)
}

// ============================================================================
// Column Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDef {
    pub field: String,
    pub editable: bool,
    pub flex: u32,
}

impl ColumnDef {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            editable: true,
            flex: 1,
        }
    }
}

/// Columns shown by default. Every column is editable.
pub fn default_columns() -> Vec<ColumnDef> {
    ["athlete", "age", "country"]
        .iter()
        .map(|f| ColumnDef::new(f))
        .collect()
}

// ============================================================================
// Default Data
// ============================================================================

type RawRow = (&'static str, u32, &'static str, u32, &'static str, &'static str, u32, u32, u32);

const DEFAULT_ROWS: &[RawRow] = &[
    ("Michael Phelps", 23, "United States", 2008, "24/08/2008", "Swimming", 8, 0, 0),
    ("Michael Phelps", 19, "United States", 2004, "29/08/2004", "Swimming", 6, 0, 2),
    ("Michael Phelps", 27, "United States", 2012, "12/08/2012", "Swimming", 4, 2, 0),
    ("Natalie Coughlin", 25, "United States", 2008, "24/08/2008", "Swimming", 1, 2, 3),
    ("Aleksey Nemov", 24, "Russia", 2000, "01/10/2000", "Gymnastics", 2, 1, 3),
    ("Alicia Coutts", 24, "Australia", 2012, "12/08/2012", "Swimming", 1, 3, 1),
    ("Missy Franklin", 17, "United States", 2012, "12/08/2012", "Swimming", 4, 0, 1),
    ("Ryan Lochte", 27, "United States", 2012, "12/08/2012", "Swimming", 2, 2, 1),
    ("Allison Schmitt", 22, "United States", 2012, "12/08/2012", "Swimming", 3, 1, 1),
    ("Natalie Coughlin", 21, "United States", 2004, "29/08/2004", "Swimming", 2, 2, 1),
    ("Ian Thorpe", 17, "Australia", 2000, "01/10/2000", "Swimming", 3, 2, 0),
    ("Dara Torres", 33, "United States", 2000, "01/10/2000", "Swimming", 2, 0, 3),
];

/// Rows rendered before any session state arrives.
pub fn default_rows() -> GridSnapshot {
    DEFAULT_ROWS
        .iter()
        .map(
            |&(athlete, age, country, year, date, sport, gold, silver, bronze)| OlympicRow {
                athlete: athlete.to_string(),
                age,
                country: country.to_string(),
                year,
                date: date.to_string(),
                sport: sport.to_string(),
                gold,
                silver,
                bronze,
                total: gold + silver + bronze,
            },
        )
        .collect()
}

// ============================================================================
// Sessions
// ============================================================================

/// Opaque token naming one collaborative session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Allocate a fresh id: 16 random bytes as lowercase hex.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 16] = rng.gen();
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
        }
    }
}
