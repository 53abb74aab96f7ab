//! CSV output for fetched tables.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tinygrid_api::ercot::ArchiveLink;
use tinygrid_api::table::Table;

/// Writes `table` as CSV to `output`, or to stdout when `None`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or writing fails.
pub fn write_table(table: &Table, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            table
                .write_csv(BufWriter::new(file))
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), rows = table.len(), "Wrote CSV");
        }
        None => {
            table
                .write_csv(std::io::stdout().lock())
                .context("failed to write CSV to stdout")?;
        }
    }
    Ok(())
}

/// Archive listing as a three-column table.
#[must_use]
pub fn links_table(links: &[ArchiveLink]) -> Table {
    let columns = ["doc_id", "post_datetime", "url"]
        .into_iter()
        .map(String::from)
        .collect();
    let rows = links
        .iter()
        .map(|link| {
            vec![
                Value::String(link.doc_id.clone()),
                Value::String(link.post_datetime.clone()),
                Value::String(link.url.clone()),
            ]
        })
        .collect();
    Table::from_rows(columns, rows)
}
