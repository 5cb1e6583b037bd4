//! Schema-Tolerant Writer — persistence layer that never trusts a build-time
//! field list.
//!
//! At run start the live field set of the jobs table is discovered by
//! sampling a few records and taking the union of their field keys. Every
//! payload is filtered against that set before writing (each dropped field
//! logged as `FIELD_DROP`), so a renamed or deleted column degrades a write
//! instead of failing the record. Two scoped fallbacks survive from known
//! failure modes: a rejected write is retried once without the status
//! bookkeeping fields, and an enum-option rejection of `NextAction` is
//! retried once with the neutral `Review` option.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::store::{Record, RecordStore, StoreError};

const SAMPLE_SIZE: u32 = 3;

/// Bookkeeping fields stripped on the one-shot write retry.
const STRIP_ON_RETRY: [&str; 2] = ["ScoringStatus", "SkipReason"];

const NEXT_ACTION_FIELD: &str = "NextAction";
const NEXT_ACTION_FALLBACK: &str = "Review";

/// Result of one tolerant write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write landed; `dropped` lists fields removed along the way
    /// (live-set filtering or the retry strip).
    Written { dropped: Vec<String> },
    /// Nothing survived filtering, so no request was made.
    SkippedEmpty,
    /// Dry-run mode: the payload was valid but not sent.
    DryRun,
}

impl WriteOutcome {
    pub fn dropped(&self) -> &[String] {
        match self {
            WriteOutcome::Written { dropped } => dropped,
            _ => &[],
        }
    }
}

/// Writer bound to one table for the duration of a run. The live field set
/// is discovered once and never refreshed mid-run.
pub struct SchemaWriter<'a> {
    store: &'a dyn RecordStore,
    table: String,
    live_fields: Option<HashSet<String>>,
    dry_run: bool,
}

impl<'a> SchemaWriter<'a> {
    /// Samples the table and builds the writer. An empty or unreadable
    /// sample disables filtering rather than blocking every write: blank
    /// columns are omitted from records, so an empty sample proves nothing
    /// about the schema.
    pub async fn discover(store: &'a dyn RecordStore, table: &str, dry_run: bool) -> Self {
        let live_fields = match store.list(table, SAMPLE_SIZE, None).await {
            Ok(records) if !records.is_empty() => {
                let union: HashSet<String> = records
                    .iter()
                    .flat_map(|r| r.fields.keys().cloned())
                    .collect();
                info!(
                    "FIELDS_OK table={} sampled={} live_fields={}",
                    table,
                    records.len(),
                    union.len()
                );
                Some(union)
            }
            Ok(_) => {
                warn!("FIELDS_UNKNOWN table={} reason=empty_sample", table);
                None
            }
            Err(e) => {
                warn!("FIELDS_UNKNOWN table={} reason={}", table, e);
                None
            }
        };

        Self {
            store,
            table: table.to_string(),
            live_fields,
            dry_run,
        }
    }

    #[cfg(test)]
    fn with_live_fields(
        store: &'a dyn RecordStore,
        table: &str,
        live_fields: Option<HashSet<String>>,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            table: table.to_string(),
            live_fields,
            dry_run,
        }
    }

    pub fn knows_field(&self, name: &str) -> bool {
        match &self.live_fields {
            Some(live) => live.contains(name),
            None => true,
        }
    }

    fn filter(&self, fields: Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
        let Some(live) = &self.live_fields else {
            return (fields, Vec::new());
        };
        let mut kept = Map::new();
        let mut dropped = Vec::new();
        for (name, value) in fields {
            if live.contains(&name) {
                kept.insert(name, value);
            } else {
                warn!("FIELD_DROP table={} field={}", self.table, name);
                dropped.push(name);
            }
        }
        (kept, dropped)
    }

    /// Filters and writes one payload. On rejection, retries once without
    /// the status bookkeeping fields; a second rejection propagates.
    pub async fn update(
        &self,
        record_id: &str,
        fields: Map<String, Value>,
    ) -> Result<WriteOutcome, StoreError> {
        let (kept, mut dropped) = self.filter(fields);
        if kept.is_empty() {
            return Ok(WriteOutcome::SkippedEmpty);
        }
        if self.dry_run {
            info!(
                "DRY_RUN table={} record={} fields={}",
                self.table,
                record_id,
                kept.len()
            );
            return Ok(WriteOutcome::DryRun);
        }

        match self.store.update(&self.table, record_id, kept.clone()).await {
            Ok(_) => Ok(WriteOutcome::Written { dropped }),
            Err(first) => {
                let mut stripped = kept;
                let mut removed_any = false;
                for name in STRIP_ON_RETRY {
                    if stripped.remove(name).is_some() {
                        dropped.push(name.to_string());
                        removed_any = true;
                    }
                }
                if !removed_any || stripped.is_empty() {
                    return Err(first);
                }
                warn!(
                    "WRITE_RETRY table={} record={} stripped_status_fields err={}",
                    self.table, record_id, first
                );
                self.store.update(&self.table, record_id, stripped).await?;
                Ok(WriteOutcome::Written { dropped })
            }
        }
    }

    /// Writes the NextAction field. An enum-option rejection (the value is
    /// not in the column's option set) downgrades to `Review` once. Returns
    /// the value actually persisted, or None when the field was dropped.
    pub async fn write_next_action(
        &self,
        record_id: &str,
        action: &str,
    ) -> Result<Option<String>, StoreError> {
        if !self.knows_field(NEXT_ACTION_FIELD) {
            warn!("FIELD_DROP table={} field={}", self.table, NEXT_ACTION_FIELD);
            return Ok(None);
        }
        if self.dry_run {
            info!(
                "DRY_RUN table={} record={} NextAction={}",
                self.table, record_id, action
            );
            return Ok(Some(action.to_string()));
        }

        let mut payload = Map::new();
        payload.insert(NEXT_ACTION_FIELD.to_string(), Value::String(action.to_string()));
        match self.store.update(&self.table, record_id, payload).await {
            Ok(_) => Ok(Some(action.to_string())),
            Err(e) if e.is_invalid_option() && action != NEXT_ACTION_FALLBACK => {
                warn!(
                    "NEXT_ACTION_FALLBACK record={} rejected={} using={}",
                    record_id, action, NEXT_ACTION_FALLBACK
                );
                let mut fallback = Map::new();
                fallback.insert(
                    NEXT_ACTION_FIELD.to_string(),
                    Value::String(NEXT_ACTION_FALLBACK.to_string()),
                );
                self.store.update(&self.table, record_id, fallback).await?;
                Ok(Some(NEXT_ACTION_FALLBACK.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
