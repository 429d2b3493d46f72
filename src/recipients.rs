//! Recipient table loading: remote CSV over HTTP, local CSV/TSV or workbook.
//!
//! Every source is normalized into a [`RecipientTable`] whose row order is the
//! send order. Only column presence is validated; cell contents pass through
//! as trimmed strings.

use std::path::Path;

use calamine::Reader;
use tracing::{debug, info};

use crate::error::SourceError;

/// Columns every recipient table must carry (exact, case-sensitive).
pub const REQUIRED_COLUMNS: [&str; 3] = ["Name", "Email", "Company"];

/// One addressee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRecord {
    pub name: String,
    pub email: String,
    pub company: String,
}

/// Ordered, index-addressable recipient list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientTable {
    records: Vec<RecipientRecord>,
}

impl RecipientTable {
    pub fn new(records: Vec<RecipientRecord>) -> Self {
        Self { records }
    }

    /// Build a table from a header row and data rows.
    ///
    /// Fails with `SchemaInvalid` listing every required column that is
    /// absent. Extra columns are ignored and short rows read as empty cells.
    pub fn from_rows<H, R, C>(header: H, rows: R) -> Result<Self, SourceError>
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let header: Vec<String> = header
            .into_iter()
            .map(|h| h.as_ref().to_string())
            .collect();

        let mut positions = [0usize; 3];
        let mut missing = Vec::new();
        for (slot, column) in REQUIRED_COLUMNS.iter().enumerate() {
            match header.iter().position(|h| h == column) {
                Some(pos) => positions[slot] = pos,
                None => missing.push((*column).to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(SourceError::SchemaInvalid { missing });
        }

        let [name_at, email_at, company_at] = positions;
        let records = rows
            .into_iter()
            .map(|row| {
                let cells: Vec<String> = row
                    .into_iter()
                    .map(|c| c.as_ref().trim().to_string())
                    .collect();
                let cell = |at: usize| cells.get(at).cloned().unwrap_or_default();
                RecipientRecord {
                    name: cell(name_at),
                    email: cell(email_at),
                    company: cell(company_at),
                }
            })
            .collect();

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RecipientRecord> {
        self.records.get(index)
    }

    /// Rows from `start` to the end, paired with their absolute index.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = (usize, &RecipientRecord)> {
        self.records.iter().enumerate().skip(start)
    }
}

/// Loads recipient tables from local files or remote URLs.
#[derive(Debug, Clone, Default)]
pub struct RecipientSource {
    http: reqwest::Client,
}

impl RecipientSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the table at `location`.
    ///
    /// Remote locations are fetched as CSV text; local ones are parsed by
    /// extension (`.csv`, `.tsv`, anything else as a workbook).
    pub async fn load(&self, location: &str, remote: bool) -> Result<RecipientTable, SourceError> {
        let table = if remote {
            let body = self.fetch(location).await?;
            parse_delimited(body.as_bytes(), b',', location)?
        } else {
            let path = location.to_string();
            tokio::task::spawn_blocking(move || read_local(Path::new(&path)))
                .await
                .map_err(|e| SourceError::Parse {
                    location: location.to_string(),
                    reason: format!("reader task panicked: {e}"),
                })??
        };

        info!(location, remote, rows = table.len(), "Loaded recipient table");
        Ok(table)
    }

    async fn fetch(&self, url: &str) -> Result<String, SourceError> {
        let unavailable = |reason: String| SourceError::Unavailable {
            location: url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        debug!(url, %status, "Fetched remote recipient source");
        response.text().await.map_err(|e| unavailable(e.to_string()))
    }
}

/// Read a local CSV/TSV file or workbook.
fn read_local(path: &Path) -> Result<RecipientTable, SourceError> {
    let location = path.display().to_string();
    if !path.is_file() {
        return Err(SourceError::Unavailable {
            location,
            reason: "file not found".into(),
        });
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") | Some("tsv") => {
            let delimiter = if extension.as_deref() == Some("tsv") {
                b'\t'
            } else {
                b','
            };
            let file = std::fs::File::open(path).map_err(|e| SourceError::Unavailable {
                location: location.clone(),
                reason: e.to_string(),
            })?;
            parse_delimited(file, delimiter, &location)
        }
        _ => read_workbook(path, &location),
    }
}

/// Parse delimited text with a header row.
fn parse_delimited<R: std::io::Read>(
    input: R,
    delimiter: u8,
    location: &str,
) -> Result<RecipientTable, SourceError> {
    let parse_error = |e: csv::Error| SourceError::Parse {
        location: location.to_string(),
        reason: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input);

    let header = reader.headers().map_err(parse_error)?.clone();
    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(parse_error)?;

    RecipientTable::from_rows(header.iter(), rows.iter().map(|r| r.iter()))
}

/// Parse the first worksheet of a workbook; its first row is the header.
fn read_workbook(path: &Path, location: &str) -> Result<RecipientTable, SourceError> {
    let parse_error = |reason: String| SourceError::Parse {
        location: location.to_string(),
        reason,
    };

    let mut workbook = calamine::open_workbook_auto(path).map_err(|e| parse_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| parse_error("workbook has no worksheets".into()))?
        .map_err(|e| parse_error(e.to_string()))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
    let header = rows.next().unwrap_or_default();

    RecipientTable::from_rows(header, rows)
}
