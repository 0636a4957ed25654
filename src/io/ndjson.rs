//! NDJSON (Newline Delimited JSON) record import.
//!
//! Catalog, customer and behaviour records arrive one JSON object per line.
//! Each importer parses the whole file, validates every record, then writes
//! the records to the store in one transaction.

use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::database::crud::{write_behavior, write_product, write_user_profile};
use crate::database::{BehaviorKind, BehaviorRecord, NewProduct, ShopDatabase, UserProfile};

/// Error types for record import.
#[derive(Error, Debug)]
pub enum ImportError {
    /// I/O error when reading files
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error at line {line}: {source}")]
    JsonParse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A record parsed but is not acceptable
    #[error("Invalid record at line {line}: {reason}")]
    InvalidFormat { line: usize, reason: String },

    /// Empty or invalid data
    #[error("No valid data found: {context}")]
    NoData { context: String },

    /// Writing to the store failed
    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl ImportError {
    /// Create an invalid record error
    pub fn invalid_format(line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            line,
            reason: reason.into(),
        }
    }

    /// Create a no data error
    pub fn no_data(context: impl Into<String>) -> Self {
        Self::NoData {
            context: context.into(),
        }
    }
}

/// Customer record as it appears in an import file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileImport {
    pub user_id: i64,
    pub username: String,
    #[serde(default)]
    pub total_orders: i64,
    #[serde(default)]
    pub total_spent: f64,
}

impl From<ProfileImport> for UserProfile {
    fn from(record: ProfileImport) -> Self {
        UserProfile::new(record.user_id, record.username)
            .with_purchase_stats(record.total_orders, record.total_spent)
    }
}

/// Parse an NDJSON file, validating each entry.
///
/// Blank lines are skipped. The validator receives the 1-based line number.
pub fn parse_ndjson_file_generic<T, F>(
    path: impl AsRef<Path>,
    validate_entry: Option<F>,
) -> Result<Vec<T>, ImportError>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(usize, &T) -> Result<(), ImportError>,
{
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let entry: T = serde_json::from_str(&line).map_err(|e| ImportError::JsonParse {
            line: line_number + 1,
            source: e,
        })?;

        if let Some(ref validator) = validate_entry {
            validator(line_number + 1, &entry)?;
        }

        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(ImportError::no_data(format!(
            "No valid entries found in file '{}'",
            path.display()
        )));
    }

    Ok(entries)
}

pub fn parse_products(path: impl AsRef<Path>) -> Result<Vec<NewProduct>, ImportError> {
    parse_ndjson_file_generic(
        path,
        Some(|line: usize, product: &NewProduct| {
            if product.sku.trim().is_empty() {
                Err(ImportError::invalid_format(line, "empty sku"))
            } else if product.price.is_nan() || product.price < 0.0 {
                Err(ImportError::invalid_format(line, "price must be non-negative"))
            } else {
                Ok(())
            }
        }),
    )
}

pub fn parse_profiles(path: impl AsRef<Path>) -> Result<Vec<ProfileImport>, ImportError> {
    parse_ndjson_file_generic(
        path,
        Some(|line: usize, profile: &ProfileImport| {
            if profile.total_orders < 0 || profile.total_spent < 0.0 {
                Err(ImportError::invalid_format(
                    line,
                    "purchase totals must be non-negative",
                ))
            } else {
                Ok(())
            }
        }),
    )
}

pub fn parse_behaviors(path: impl AsRef<Path>) -> Result<Vec<BehaviorRecord>, ImportError> {
    parse_ndjson_file_generic(
        path,
        Some(|line: usize, record: &BehaviorRecord| {
            if record.kind != BehaviorKind::Search && record.product_id.is_none() {
                Err(ImportError::invalid_format(
                    line,
                    format!("{} event without product_id", record.kind),
                ))
            } else {
                Ok(())
            }
        }),
    )
}

/// Write every record in one transaction; nothing is kept if one write fails.
fn write_all<T>(
    db: &mut ShopDatabase,
    records: &[T],
    write: impl Fn(&Connection, &T) -> anyhow::Result<()>,
) -> Result<(), ImportError> {
    let tx = db
        .connection
        .transaction()
        .context("failed to begin import transaction")?;
    let conn: &Connection = &tx;
    for record in records {
        write(conn, record)?;
    }
    tx.commit().context("failed to commit import")?;
    Ok(())
}

/// Import products; returns the number written.
pub fn import_products(db: &mut ShopDatabase, path: impl AsRef<Path>) -> Result<usize, ImportError> {
    let products = parse_products(path)?;
    write_all(db, &products, |conn, product| {
        write_product(conn, product).map(|_| ())
    })?;
    info!(count = products.len(), "📦 Products imported");
    Ok(products.len())
}

/// Import customer profiles; existing profiles are overwritten.
pub fn import_profiles(db: &mut ShopDatabase, path: impl AsRef<Path>) -> Result<usize, ImportError> {
    let profiles: Vec<UserProfile> = parse_profiles(path)?.into_iter().map(Into::into).collect();
    write_all(db, &profiles, write_user_profile)?;
    info!(count = profiles.len(), "👤 Customer profiles imported");
    Ok(profiles.len())
}

/// Import behaviour events.
pub fn import_behaviors(db: &mut ShopDatabase, path: impl AsRef<Path>) -> Result<usize, ImportError> {
    let records = parse_behaviors(path)?;
    write_all(db, &records, |conn, record| {
        write_behavior(conn, record).map(|_| ())
    })?;
    info!(count = records.len(), "👣 Behaviour events imported");
    Ok(records.len())
}
