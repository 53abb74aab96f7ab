//! Historical document archive: listing, bulk download and parsing.
//!
//! Data older than the live retention window is published as zipped CSV
//! documents. Listing is a paginated GET; downloads are batched POSTs
//! returning a zip whose entries are themselves `{docId}.zip` documents.

use std::fmt;
use std::io::{Cursor, Read};

use futures::{StreamExt, stream};
use reqwest::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use zip::ZipArchive;

use super::client::ErcotClient;
use super::dates::{DateRange, format_api_datetime};
use super::error::{GridError, GridResult};
use super::report::Report;
use crate::table::Table;

/// Archive listing page size.
const LISTING_PAGE_SIZE: u32 = 1000;

/// Endpoint label used in errors for document parsing.
const DOCUMENT_ENDPOINT: &str = "archive document";

/// One archived document as listed by the archive API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLink {
    /// Document identifier used for bulk download.
    pub doc_id: String,
    /// Direct download URL.
    pub url: String,
    /// When the document was posted, as reported by the API.
    pub post_datetime: String,
}

/// A downloaded archive document (usually a zip of CSVs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDocument {
    /// Document identifier.
    pub doc_id: String,
    /// Raw document bytes.
    pub bytes: Vec<u8>,
}

/// Result of a bulk download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDownload {
    /// Documents found, in request order.
    pub documents: Vec<ArchiveDocument>,
    /// Requested ids absent from every response.
    pub missing: Vec<String>,
}

/// A part of an archive fetch that produced no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveFailure {
    /// Listing or downloading a whole chunk failed.
    Chunk {
        /// Chunk that failed.
        range: DateRange,
        /// Error message after retries.
        error: String,
    },
    /// A listed document was not in the download response.
    Missing {
        /// Chunk the document belongs to.
        range: DateRange,
        /// Document identifier.
        doc_id: String,
    },
    /// A document was downloaded but could not be parsed.
    Unparsable {
        /// Chunk the document belongs to.
        range: DateRange,
        /// Document identifier.
        doc_id: String,
        /// Parser message.
        error: String,
    },
}

impl fmt::Display for ArchiveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk { range, error } => write!(
                f,
                "chunk {}..{} failed: {error}",
                range.start_date(),
                range.end_date()
            ),
            Self::Missing { range, doc_id } => write!(
                f,
                "document {doc_id} ({}..{}) missing from download",
                range.start_date(),
                range.end_date()
            ),
            Self::Unparsable {
                range,
                doc_id,
                error,
            } => write!(
                f,
                "document {doc_id} ({}..{}) unparsable: {error}",
                range.start_date(),
                range.end_date()
            ),
        }
    }
}

/// Outcome of [`ErcotClient::fetch_archive`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveFetch {
    /// Rows from every parsed document, in chunk order.
    pub table: Table,
    /// Everything that was requested but produced no rows.
    pub failures: Vec<ArchiveFailure>,
    /// Number of documents parsed.
    pub documents: usize,
}

impl ArchiveFetch {
    /// Whether some part of the range failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(rename = "_meta", default)]
    meta: Option<ListingMeta>,
    #[serde(default)]
    archives: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingMeta {
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingEntry {
    doc_id: Option<Value>,
    post_datetime: Option<String>,
    #[serde(rename = "_links", default)]
    links: Option<ListingLinks>,
}

#[derive(Debug, Deserialize)]
struct ListingLinks {
    endpoint: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: Option<String>,
}

impl ListingEntry {
    fn into_link(self) -> Option<ArchiveLink> {
        let url = self.links?.endpoint?.href.filter(|h| !h.is_empty())?;
        let doc_id = match url.rsplit_once('=') {
            Some((_, id)) if !id.is_empty() => String::from(id),
            _ => match self.doc_id? {
                Value::String(s) => s,
                other => other.to_string(),
            },
        };
        Some(ArchiveLink {
            doc_id,
            url,
            post_datetime: self.post_datetime.unwrap_or_default(),
        })
    }
}

/// Per-chunk result before aggregation.
#[derive(Debug, Default)]
struct ChunkOutcome {
    tables: Vec<Table>,
    failures: Vec<ArchiveFailure>,
    documents: usize,
}

impl ErcotClient {
    /// Lists archived documents of `emil_id` posted within `range`.
    ///
    /// Archive paths are lowercase, so `NP6-905-CD` and `np6-905-cd` list
    /// the same report.
    ///
    /// # Errors
    ///
    /// Returns an error if any listing page fails after retries.
    #[instrument(skip_all, fields(emil_id))]
    pub async fn list_archives(
        &self,
        emil_id: &str,
        range: &DateRange,
    ) -> GridResult<Vec<ArchiveLink>> {
        let emil_id = emil_id.trim().to_ascii_lowercase();
        let endpoint = format!("archive/{emil_id}");
        let url = self.endpoint_url(&endpoint)?;
        let mut links = Vec::new();
        let mut page: u32 = 1;
        let mut total_pages: u32 = 1;

        while page <= total_pages {
            let query = [
                ("postDatetimeFrom", format_api_datetime(&range.start)),
                ("postDatetimeTo", format_api_datetime(&range.end)),
                ("size", LISTING_PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            let listing: ListingPage = self.get_json(&endpoint, &url, &query).await?;
            if page == 1 {
                total_pages = listing
                    .meta
                    .and_then(|m| m.total_pages)
                    .unwrap_or(1)
                    .max(1);
                tracing::debug!(%emil_id, total_pages, "Archive listing");
            }
            links.extend(listing.archives.into_iter().filter_map(ListingEntry::into_link));
            page = page.saturating_add(1);
        }

        tracing::info!(%emil_id, count = links.len(), "Listed archives");
        Ok(links)
    }

    /// Downloads documents in batches of at most `archive_batch_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch request fails after retries or its
    /// response is not a zip.
    #[instrument(skip_all, fields(emil_id, count = doc_ids.len()))]
    pub async fn bulk_download(
        &self,
        emil_id: &str,
        doc_ids: &[String],
    ) -> GridResult<BulkDownload> {
        let emil_id = emil_id.trim().to_ascii_lowercase();
        let endpoint = format!("archive/{emil_id}/download");
        let url = self.endpoint_url(&endpoint)?;
        let mut found: Vec<Option<Vec<u8>>> = vec![None; doc_ids.len()];

        for batch in doc_ids.chunks(self.archive_batch_size) {
            let body = serde_json::json!({ "docIds": batch });
            tracing::debug!(%emil_id, batch = batch.len(), "Requesting bulk download");
            let bytes = self
                .send(
                    &endpoint,
                    || self.http_client.post(url.clone()).json(&body),
                    |response| read_bytes(&endpoint, response),
                )
                .await?;

            for (name, entry) in unzip_entries(&endpoint, &bytes)? {
                let id = name.split('.').next().unwrap_or_default();
                if let Some(slot) = doc_ids
                    .iter()
                    .position(|d| d == id)
                    .and_then(|i| found.get_mut(i))
                {
                    *slot = Some(entry);
                }
            }
        }

        let mut download = BulkDownload::default();
        for (doc_id, bytes) in doc_ids.iter().zip(found) {
            match bytes {
                Some(bytes) => download.documents.push(ArchiveDocument {
                    doc_id: doc_id.clone(),
                    bytes,
                }),
                None => download.missing.push(doc_id.clone()),
            }
        }
        if !download.missing.is_empty() {
            tracing::warn!(
                %emil_id,
                missing = download.missing.len(),
                "Documents missing from bulk download"
            );
        }
        Ok(download)
    }

    /// Fetches `report` for `range` from the archive.
    ///
    /// The range is split into `archive_chunk_days` chunks processed with
    /// at most `max_concurrent_requests` in flight. Failed chunks, missing
    /// and unparsable documents are reported in
    /// [`ArchiveFetch::failures`].
    ///
    /// # Errors
    ///
    /// Returns the first chunk error when every chunk failed.
    #[instrument(skip_all, fields(report = %report))]
    pub async fn fetch_archive(&self, report: Report, range: &DateRange) -> GridResult<ArchiveFetch> {
        let chunks = range.chunks(self.archive_chunk_days);
        let results: Vec<(DateRange, GridResult<ChunkOutcome>)> = stream::iter(chunks)
            .map(|chunk| async move { (chunk, self.fetch_chunk(report, &chunk).await) })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        if !results.is_empty() && results.iter().all(|(_, r)| r.is_err()) {
            if let Some((_, Err(err))) = results.into_iter().next() {
                return Err(err);
            }
            return Ok(ArchiveFetch::default());
        }

        let mut tables = Vec::new();
        let mut fetch = ArchiveFetch::default();
        for (chunk, result) in results {
            match result {
                Ok(outcome) => {
                    tables.extend(outcome.tables);
                    fetch.failures.extend(outcome.failures);
                    fetch.documents = fetch.documents.saturating_add(outcome.documents);
                }
                Err(err) => {
                    tracing::warn!(
                        start = %chunk.start_date(),
                        end = %chunk.end_date(),
                        error = %err,
                        "Archive chunk failed"
                    );
                    fetch.failures.push(ArchiveFailure::Chunk {
                        range: chunk,
                        error: err.to_string(),
                    });
                }
            }
        }
        fetch.table = Table::concat(tables);

        tracing::info!(
            documents = fetch.documents,
            rows = fetch.table.len(),
            failures = fetch.failures.len(),
            "Fetched archive"
        );
        Ok(fetch)
    }

    async fn fetch_chunk(&self, report: Report, chunk: &DateRange) -> GridResult<ChunkOutcome> {
        let emil_id = report.emil_id();
        tracing::debug!(
            emil_id,
            start = %chunk.start_date(),
            end = %chunk.end_date(),
            "Fetching archive chunk"
        );

        let links = self.list_archives(emil_id, chunk).await?;
        if links.is_empty() {
            tracing::debug!(emil_id, "No archives in chunk");
            return Ok(ChunkOutcome::default());
        }

        let doc_ids: Vec<String> = links.into_iter().map(|l| l.doc_id).collect();
        let download = self.bulk_download(emil_id, &doc_ids).await?;

        let mut outcome = ChunkOutcome::default();
        outcome
            .failures
            .extend(download.missing.into_iter().map(|doc_id| ArchiveFailure::Missing {
                range: *chunk,
                doc_id,
            }));
        for document in download.documents {
            match parse_document(&document.bytes) {
                Ok(table) => {
                    outcome.tables.push(table);
                    outcome.documents = outcome.documents.saturating_add(1);
                }
                Err(err) => {
                    tracing::warn!(doc_id = %document.doc_id, error = %err, "Failed to parse archive document");
                    outcome.failures.push(ArchiveFailure::Unparsable {
                        range: *chunk,
                        doc_id: document.doc_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }
}

/// Parses one archive document into a table.
///
/// A zip document has every file entry read as CSV and concatenated;
/// anything else is read as a bare CSV.
///
/// # Errors
///
/// Returns [`GridError::Decode`] if the zip or any CSV is malformed.
pub fn parse_document(bytes: &[u8]) -> GridResult<Table> {
    if !bytes.starts_with(b"PK") {
        return Table::from_csv_reader(bytes)
            .map_err(|e| GridError::decode(DOCUMENT_ENDPOINT, e));
    }

    let tables = unzip_entries(DOCUMENT_ENDPOINT, bytes)?
        .into_iter()
        .map(|(name, entry)| {
            Table::from_csv_reader(entry.as_slice())
                .map_err(|e| GridError::decode(DOCUMENT_ENDPOINT, format!("{name}: {e}")))
        })
        .collect::<GridResult<Vec<_>>>()?;
    Ok(Table::concat(tables))
}

/// Reads every file entry of a zip as `(name, bytes)`.
fn unzip_entries(endpoint: &str, bytes: &[u8]) -> GridResult<Vec<(String, Vec<u8>)>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| GridError::decode(endpoint, e))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| GridError::decode(endpoint, e))?;
        if file.is_dir() {
            continue;
        }
        let name = String::from(file.name());
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| GridError::decode(endpoint, format!("{name}: {e}")))?;
        entries.push((name, buf));
    }
    Ok(entries)
}

async fn read_bytes(endpoint: &str, response: Response) -> GridResult<Vec<u8>> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| GridError::from_reqwest(endpoint, e))
}
