//! Row validation and normalization
//!
//! Maps one raw input row onto the request record sent to the enrichment
//! API. Rows that do not carry enough identifying data are rejected here and
//! never leave the process.

use serde::{Deserialize, Serialize};
use url::Url;

/// The required cells of one input row, as read from the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub linkedin_url: Option<String>,
    pub company_name: Option<String>,
    pub company_website: Option<String>,
}

/// A normalized record, ready to be submitted for enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub linkedin_url: Option<String>,
    pub organization_name: Option<String>,
    pub domain: Option<String>,
}

impl Record {
    pub fn is_eligible(&self) -> bool {
        self.first_name.is_some()
            && self.last_name.is_some()
            && (self.domain.is_some() || self.linkedin_url.is_some())
    }
}

/// Normalize a raw row, returning `None` when the row is not eligible for
/// enrichment.
pub fn validate(row: &RawRow) -> Option<Record> {
    let record = Record {
        first_name: clean(row.first_name.as_deref()),
        last_name: clean(row.last_name.as_deref()),
        linkedin_url: clean(row.linkedin_url.as_deref()),
        organization_name: clean(row.company_name.as_deref()),
        domain: row.company_website.as_deref().and_then(extract_domain),
    };

    record.is_eligible().then_some(record)
}

/// Extract the bare host from a website URL.
///
/// Accepts values with or without a scheme. A leading `www.` and any
/// surrounding slashes are removed. Blank or unparseable input yields `None`.
/// The host comes back normalized by URL parsing: lowercased, with
/// internationalized names punycode-encoded.
pub fn extract_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) if url.host_str().is_some() => url,
        // "example.com/about" parses as a relative reference
        Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{}", trimmed.trim_start_matches('/'))).ok()?
        }
        Err(_) => return None,
    };

    let host = parsed.host_str()?.trim_matches('/');
    let host = host.strip_prefix("www.").unwrap_or(host);

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
