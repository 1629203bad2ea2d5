/// Loading of pre-embedded metadata records.
///
/// The offline batch jobs emit one JSON object per line:
/// `{"id": ..., "page_content": ..., "metadata": {...}, "embedding": [...]}`.
/// This module only reads that file and writes rows; it never computes
/// embeddings.
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::models::MetadataRecord;
use crate::store::SqliteVectorStore;

#[derive(Debug, Deserialize)]
struct ImportLine {
    #[serde(flatten)]
    record: MetadataRecord,
    embedding: Vec<f32>,
}

/// Parse a JSONL export. Blank lines are skipped; any other bad line fails
/// the whole read with its line number.
pub fn read_jsonl(path: &Path) -> Result<Vec<(MetadataRecord, Vec<f32>)>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", path.display(), idx + 1))?;
        entries.push((parsed.record, parsed.embedding));
    }
    Ok(entries)
}

/// Import a JSONL export into `store`, returning the number of records written.
///
/// The whole file is written in one transaction: on error nothing is imported.
pub fn import_file(store: &SqliteVectorStore, path: &Path) -> Result<usize> {
    let entries = read_jsonl(path)?;
    let written = store
        .upsert_records(&entries)
        .with_context(|| format!("failed to import {}, no records written", path.display()))?;
    info!("Imported {written} records from {}", path.display());
    Ok(written)
}
