//! Instrument universe loading
//!
//! The universe is a delimited file with at least a `ticker` column. Symbols
//! are trimmed, uppercased, and deduplicated; order is not significant.

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Universe loading errors
#[derive(Error, Debug)]
pub enum UniverseError {
    #[error("failed to read tickers file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("tickers file {path} has no 'ticker' or 'symbol' column")]
    MissingColumn { path: String },
}

/// Load the instrument universe from a CSV file.
///
/// Accepts either a `ticker` or `symbol` header (case-insensitive). Empty
/// cells are skipped; duplicates are collapsed.
pub fn load_universe(path: &Path) -> Result<Vec<String>, UniverseError> {
    let display_path = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|source| UniverseError::Read {
        path: display_path.clone(),
        source,
    })?;

    let headers = reader.headers().map_err(|source| UniverseError::Read {
        path: display_path.clone(),
        source,
    })?;
    let column = headers
        .iter()
        .position(|h| {
            let h = h.trim().to_ascii_lowercase();
            h == "ticker" || h == "symbol"
        })
        .ok_or_else(|| UniverseError::MissingColumn {
            path: display_path.clone(),
        })?;

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|source| UniverseError::Read {
            path: display_path.clone(),
            source,
        })?;

        let Some(raw) = record.get(column) else {
            continue;
        };
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            continue;
        }
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    debug!(count = symbols.len(), path = %display_path, "loaded instrument universe");
    Ok(symbols)
}
