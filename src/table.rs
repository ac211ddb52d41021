//! Input and output tables
//!
//! The input is a headed CSV file. Only the required columns are kept, in
//! the order of [`REQUIRED_COLUMNS`], and an empty [`EMAIL_COLUMN`] is
//! appended. Row count and order never change.

use crate::error::{Error, Result};
use crate::record::RawRow;
use std::path::Path;
use tokio::fs;
use tracing::debug;

pub const FIRST_NAME: &str = "First Name";
pub const LAST_NAME: &str = "Last Name";
pub const LINKEDIN_URL: &str = "LinkedIn URL";
pub const COMPANY_NAME: &str = "Company Name";
pub const COMPANY_WEBSITE: &str = "Company Website";

pub const REQUIRED_COLUMNS: [&str; 5] = [
    FIRST_NAME,
    LAST_NAME,
    LINKEDIN_URL,
    COMPANY_NAME,
    COMPANY_WEBSITE,
];

pub const EMAIL_COLUMN: &str = "Email";

/// The working table of a job: required columns plus the enrichment column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentTable {
    rows: Vec<[String; 5]>,
    enrichment: Vec<String>,
}

impl EnrichmentTable {
    /// Load and project a CSV file from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).await.map_err(|source| Error::TableRead {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_csv(&bytes)?;
        debug!("Loaded {} rows from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse CSV bytes, failing when any required column is absent.
    pub fn from_csv(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(bytes);

        let headers = reader.headers()?.clone();
        let mut missing = Vec::new();
        let mut positions = [0usize; 5];
        for (slot, name) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            match headers.iter().position(|h| h == name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(Error::MissingColumns(missing));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let cell = |idx: usize| record.get(idx).unwrap_or_default().to_string();
            rows.push(positions.map(cell));
        }

        let enrichment = vec![String::new(); rows.len()];
        Ok(Self { rows, enrichment })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The required cells of row `index`, empty cells mapped to `None`.
    pub fn raw_row(&self, index: usize) -> RawRow {
        let cells = &self.rows[index];
        let opt = |s: &String| (!s.is_empty()).then(|| s.clone());
        RawRow {
            first_name: opt(&cells[0]),
            last_name: opt(&cells[1]),
            linkedin_url: opt(&cells[2]),
            company_name: opt(&cells[3]),
            company_website: opt(&cells[4]),
        }
    }

    pub fn set_enrichment(&mut self, index: usize, value: impl Into<String>) {
        self.enrichment[index] = value.into();
    }

    /// Serialize the table, header first, with the enrichment column last.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(REQUIRED_COLUMNS.iter().copied().chain([EMAIL_COLUMN]))?;
        for (cells, email) in self.rows.iter().zip(&self.enrichment) {
            writer.write_record(cells.iter().chain(std::iter::once(email)))?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }

    /// Write the table to `path`.
    ///
    /// The content is written to a sibling `.part` file first and renamed
    /// into place, so `path` only ever holds a complete table.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_csv()?;
        let write_err = |source| Error::TableWrite {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let staging = path.with_extension("csv.part");
        fs::write(&staging, &bytes).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(write_err(e));
        }
        Ok(())
    }
}
