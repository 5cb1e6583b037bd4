//! Scoring pipeline orchestration: batch runs over unscored job records and
//! single-job intake.
//!
//! Each record moves through a fixed stage order (clean, structure, flags,
//! score, arbitrate, persist) with per-record failure isolation: one bad
//! record is marked FAILED on the record itself and never aborts the run.
//! Cleaned text and the structured job object are cached on the record and
//! reused on later runs; flags are cheap and rebuilt every time.

pub mod arbitration;
pub mod cleaner;
pub mod engine;
pub mod flags;
pub mod prompts;
pub mod structurer;
pub mod writer;

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::errors::PipelineError;
use crate::llm_client::CompletionClient;
use crate::store::{Record, RecordStore};

use arbitration::arbitrate;
use cleaner::clean_html_to_text;
use engine::{
    CandidateEnvelope, JobEnvelope, JobProfile, NextAction, RuntimeParams, ScorerEngine,
    ScorerInput, ScoringResult,
};
use flags::extract_flags;
use structurer::{structure_job, JobFields};
use writer::SchemaWriter;

/// Below this many characters of cleaned text, scoring proceeds with a
/// recorded short-description advisory instead of skipping.
const CLEAN_MIN_LEN: usize = 600;

/// Selects records that have a raw description and no score yet.
const UNSCORED_FILTER: &str = "AND(LEN({JobDescriptionRaw})>0, {FitScore}=BLANK())";

const CANDIDATE_LOOKUP_FIELD: &str = "ProfileID";
const CANDIDATE_LOOKUP_VALUE: &str = "ME";
const CANDIDATE_JSON_FIELD: &str = "CandidateJSON";

const CREATIVITY_DIAL: f64 = 0.7;
const SCORE_TEMPERATURE: f64 = 0.7;

const SHORT_JD_NOTE: &str = "SHORT_JD_SCORING: scored from a short job description";
const MAX_SKIP_REASON_LEN: usize = 500;

/// Everything a run needs, bundled so record processing stays one call.
pub struct ScoringContext<'a> {
    pub store: &'a dyn RecordStore,
    pub llm: &'a dyn CompletionClient,
    pub jobs_table: &'a str,
    pub candidate_table: &'a str,
    pub parse_model: &'a str,
    pub score_model: &'a str,
    pub engines: Vec<ScorerEngine>,
    pub dry_run: bool,
    /// Pause between records; zero in tests.
    pub record_delay: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: u32,
    pub scored: u32,
    pub skipped: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Scored,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// A record with this JobURL already exists; nothing was created.
    Duplicate(String),
    /// Created and scored.
    Scored(String),
    /// Created but skipped (no description to score).
    Skipped(String),
}

/// Run identifier, minted once per run: `RUN_<UTC timestamp>`.
pub fn generate_run_id() -> String {
    format!("RUN_{}", Utc::now().format("%Y-%m-%dT%H-%M-%SZ"))
}

/// Loads the single candidate profile. A missing record or unparsable
/// CandidateJSON fails the whole run before any job is touched.
async fn load_candidate_profile(ctx: &ScoringContext<'_>) -> Result<Value, PipelineError> {
    let record = ctx
        .store
        .find_one(
            ctx.candidate_table,
            CANDIDATE_LOOKUP_FIELD,
            CANDIDATE_LOOKUP_VALUE,
        )
        .await?;

    let Some(record) = record else {
        error!(
            "FAIL_NO_CANDIDATE_JSON table={} {}={}",
            ctx.candidate_table, CANDIDATE_LOOKUP_FIELD, CANDIDATE_LOOKUP_VALUE
        );
        return Err(PipelineError::Candidate(
            "candidate profile record not found".to_string(),
        ));
    };

    let raw = record.text_field(CANDIDATE_JSON_FIELD).ok_or_else(|| {
        error!("FAIL_NO_CANDIDATE_JSON record={} field_empty", record.id);
        PipelineError::Candidate(format!("{CANDIDATE_JSON_FIELD} is empty"))
    })?;

    serde_json::from_str(raw).map_err(|e| {
        error!("FAIL_NO_CANDIDATE_JSON record={} parse_error={e}", record.id);
        PipelineError::Candidate(format!("{CANDIDATE_JSON_FIELD} is not valid JSON: {e}"))
    })
}

/// Batch mode: scores up to `max_records` unscored jobs.
pub async fn run_scoring(
    ctx: &ScoringContext<'_>,
    max_records: u32,
) -> Result<RunStats, PipelineError> {
    let run_id = generate_run_id();
    info!(
        "RUN_START run_id={} engines={} max={} dry_run={}",
        run_id,
        ctx.engines
            .iter()
            .map(|e| e.kind().name())
            .collect::<Vec<_>>()
            .join(","),
        max_records,
        ctx.dry_run
    );
    for scorer in &ctx.engines {
        info!(
            "ACTIVE_PROMPT_HASH engine={} hash={}",
            scorer.kind().name(),
            scorer.prompt_hash()
        );
    }

    let candidate = load_candidate_profile(ctx).await?;
    let jd_writer = SchemaWriter::discover(ctx.store, ctx.jobs_table, ctx.dry_run).await;

    let records = ctx
        .store
        .list(ctx.jobs_table, max_records, Some(UNSCORED_FILTER))
        .await?;

    let mut stats = RunStats {
        total: records.len() as u32,
        ..RunStats::default()
    };

    for (i, record) in records.iter().enumerate() {
        if i > 0 && !ctx.record_delay.is_zero() {
            tokio::time::sleep(ctx.record_delay).await;
        }

        match score_job_record(ctx, &jd_writer, &candidate, record, &run_id).await {
            Ok(RecordOutcome::Scored) => stats.scored += 1,
            Ok(RecordOutcome::Skipped) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                error!("RECORD_FAILED record={} error={}", record.id, e);
                mark_failed(&jd_writer, &record.id, &e).await;
            }
        }
    }

    info!(
        "RUN_DONE run_id={} total={} scored={} skipped={} failed={}",
        run_id, stats.total, stats.scored, stats.skipped, stats.failed
    );
    Ok(stats)
}

/// Single-job intake: dedup by JobURL, create, then score the new record.
pub async fn run_single_intake(
    ctx: &ScoringContext<'_>,
    job_url: &str,
    raw_description: Option<String>,
) -> Result<IntakeOutcome, PipelineError> {
    if let Some(existing) = ctx.store.find_one(ctx.jobs_table, "JobURL", job_url).await? {
        info!("SKIP_DUPLICATE url={} record={}", job_url, existing.id);
        return Ok(IntakeOutcome::Duplicate(existing.id));
    }

    let mut fields = Map::new();
    fields.insert("JobURL".to_string(), json!(job_url));
    fields.insert("Status".to_string(), json!("New"));
    fields.insert("Source".to_string(), json!("manual"));
    fields.insert(
        "DateFound".to_string(),
        json!(Utc::now().format("%Y-%m-%d").to_string()),
    );
    if let Some(raw) = raw_description {
        fields.insert("JobDescriptionRaw".to_string(), json!(raw));
    }

    let record = ctx.store.create(ctx.jobs_table, fields).await?;
    info!("INTAKE_OK url={} record={}", job_url, record.id);

    let run_id = generate_run_id();
    let candidate = load_candidate_profile(ctx).await?;
    let jd_writer = SchemaWriter::discover(ctx.store, ctx.jobs_table, ctx.dry_run).await;

    match score_job_record(ctx, &jd_writer, &candidate, &record, &run_id).await {
        Ok(RecordOutcome::Scored) => Ok(IntakeOutcome::Scored(record.id)),
        Ok(RecordOutcome::Skipped) => Ok(IntakeOutcome::Skipped(record.id)),
        Err(e) => {
            error!("RECORD_FAILED record={} error={}", record.id, e);
            mark_failed(&jd_writer, &record.id, &e).await;
            Err(e)
        }
    }
}

/// Scores one record through the full stage order. Returns Skipped only for
/// the no-description terminal state; everything else either scores or errs.
async fn score_job_record(
    ctx: &ScoringContext<'_>,
    jd_writer: &SchemaWriter<'_>,
    candidate: &Value,
    record: &Record,
    run_id: &str,
) -> Result<RecordOutcome, PipelineError> {
    // Stages 1-2: cleaned text, cached across runs. A missing raw
    // description and one that cleans down to nothing are the same terminal
    // state: mark Needs JD and never touch the LLM for this record.
    let cached_clean = record.text_field("JobDescriptionText").map(String::from);
    let clean = match &cached_clean {
        Some(cached) => cached.clone(),
        None => record
            .text_field("JobDescriptionRaw")
            .map(clean_html_to_text)
            .unwrap_or_default(),
    };

    if clean.is_empty() {
        info!("SKIP_NO_JD record={}", record.id);
        let mut fields = Map::new();
        fields.insert("Status".to_string(), json!("Needs JD"));
        fields.insert("ScoringStatus".to_string(), json!("SKIPPED"));
        fields.insert("SkipReason".to_string(), json!("No job description"));
        jd_writer.update(&record.id, fields).await?;
        return Ok(RecordOutcome::Skipped);
    }

    if cached_clean.is_none() {
        let mut fields = Map::new();
        fields.insert("JobDescriptionText".to_string(), json!(clean));
        write_group(jd_writer, &record.id, "clean_text", fields).await;
    }

    let short_jd = clean.chars().count() < CLEAN_MIN_LEN;
    if short_jd {
        warn!(
            "WARN_SHORT_JD record={} len={}",
            record.id,
            clean.chars().count()
        );
    }

    // Stage 3: structured fields, cached across runs
    let existing_title = record.text_field("JobTitle").map(String::from);
    let job_fields = match record
        .text_field("JobJSON")
        .and_then(|cached| serde_json::from_str::<JobFields>(cached).ok())
    {
        Some(cached) => cached,
        None => {
            let outcome =
                structure_job(ctx.llm, ctx.parse_model, &clean, existing_title.clone()).await?;
            let fields = outcome.into_fields();
            write_group(jd_writer, &record.id, "structured", structured_payload(&fields)?).await;
            fields
        }
    };

    // Stage 4: flags, rebuilt every run
    let jd_flags = extract_flags(&clean);
    info!(
        "FLAGS_OK record={} clearance={} travel={} research_only={}",
        record.id, jd_flags.requires_clearance, jd_flags.requires_travel, jd_flags.research_only
    );

    // Stage 5: scorer input envelope
    let title = job_fields
        .job_title
        .clone()
        .or(existing_title)
        .unwrap_or_else(|| "Unknown".to_string());
    let input = ScorerInput {
        candidate: CandidateEnvelope {
            candidate_profile: candidate.clone(),
        },
        job: JobEnvelope {
            job_profile: JobProfile {
                title,
                company: job_fields.company.clone().unwrap_or_else(|| "Unknown".to_string()),
                location: job_fields.location.clone().unwrap_or_else(|| "Unknown".to_string()),
                employment_type: job_fields.remote_status.clone(),
                role_family_guess: job_fields.seniority.clone(),
                responsibilities: job_fields.responsibilities.clone(),
                required_qualifications: job_fields.requirements.clone(),
                preferred_qualifications: Vec::new(),
                tech_stack: job_fields.tech_stack.clone(),
                industry: String::new(),
                flags: jd_flags,
                raw_text: clean.clone(),
            },
            job_json: job_fields.clone(),
        },
        runtime: RuntimeParams {
            creativity_dial: CREATIVITY_DIAL,
            model: ctx.score_model.to_string(),
            temperature: SCORE_TEMPERATURE,
            run_id: run_id.to_string(),
        },
    };

    // Stage 6: engines, then arbitration when more than one ran
    let mut results: Vec<ScoringResult> = Vec::with_capacity(ctx.engines.len());
    for scorer in &ctx.engines {
        results.push(scorer.run(ctx.llm, &input).await?);
    }

    let (winner, winner_gated) = if results.len() > 1 {
        let hashes: Vec<(String, String)> = ctx
            .engines
            .iter()
            .map(|e| (e.kind().name().to_string(), e.prompt_hash()))
            .collect();
        let comparison = arbitrate(&results, &hashes, &input.runtime);

        let mut fields = Map::new();
        fields.insert("ScoringAB".to_string(), json!(comparison.artifact));
        write_group(jd_writer, &record.id, "scoring_ab", fields).await;
        info!("SCORING_AB_WRITE record={}", record.id);

        let gated = comparison.gate_failures[comparison.winner];
        (comparison.winner, gated)
    } else {
        (0, arbitration::is_hard_gate_failure(&results[0]))
    };
    let result = &results[winner];

    // Gate failures are authoritative, whatever the engine's own action said
    let final_action = if winner_gated {
        NextAction::Skip
    } else {
        result.next_action
    };

    // Stage 7: persistence, in independent groups. Only the core score group
    // can fail the record; the rest degrade to a logged warning.
    let mut fields = Map::new();
    fields.insert("FitScore".to_string(), json!(result.fit_score));
    fields.insert("Status".to_string(), json!("Scored"));
    fields.insert("ScoringStatus".to_string(), json!("SCORED"));
    fields.insert("RunID".to_string(), json!(run_id));
    jd_writer.update(&record.id, fields).await?;
    info!("UPDATE_OK record={}", record.id);

    if let Err(e) = jd_writer
        .write_next_action(&record.id, final_action.as_str())
        .await
    {
        warn!(
            "GROUP_WRITE_FAILED record={} group=next_action error={}",
            record.id, e
        );
    }

    let mut notes = result.needs_human_input.clone();
    notes.extend(job_fields.needs_human_input.iter().cloned());
    if short_jd {
        notes.push(SHORT_JD_NOTE.to_string());
    }
    let notes = dedup_notes(notes);

    let mut optional = Map::new();
    if !result.fit_reasons.is_empty() {
        optional.insert("FitReasons".to_string(), json!(join_lines(&result.fit_reasons)));
    }
    if !result.gaps_risks.is_empty() {
        optional.insert("GapsRisks".to_string(), json!(join_lines(&result.gaps_risks)));
    }
    if !notes.is_empty() {
        optional.insert("NeedsHumanInput".to_string(), json!(join_lines(&notes)));
    }
    if !optional.is_empty() {
        write_group(jd_writer, &record.id, "narrative", optional).await;
    }

    info!(
        "SCORED_OK record={} engine={} fit={} action={}",
        record.id,
        result.engine.name(),
        result.fit_score,
        final_action.as_str()
    );
    Ok(RecordOutcome::Scored)
}

/// One field group whose failure degrades to a warning instead of failing
/// the record; groups are independent by design.
async fn write_group(
    jd_writer: &SchemaWriter<'_>,
    record_id: &str,
    group: &str,
    fields: Map<String, Value>,
) {
    if let Err(e) = jd_writer.update(record_id, fields).await {
        warn!(
            "GROUP_WRITE_FAILED record={} group={} error={}",
            record_id, group, e
        );
    }
}

/// JobJSON plus the flattened columns, written as one group on fresh parses.
fn structured_payload(fields: &JobFields) -> Result<Map<String, Value>, PipelineError> {
    let mut payload = Map::new();
    payload.insert("JobJSON".to_string(), json!(serde_json::to_string(fields)?));
    payload.insert("Status".to_string(), json!("Parsed"));
    if let Some(company) = &fields.company {
        payload.insert("Company".to_string(), json!(company));
    }
    if let Some(title) = &fields.job_title {
        payload.insert("JobTitle".to_string(), json!(title));
    }
    if let Some(location) = &fields.location {
        payload.insert("Location".to_string(), json!(location));
    }
    payload.insert("RemoteStatus".to_string(), json!(fields.remote_status));
    if !fields.requirements.is_empty() {
        payload.insert("Requirements".to_string(), json!(join_lines(&fields.requirements)));
    }
    if !fields.responsibilities.is_empty() {
        payload.insert(
            "Responsibilities".to_string(),
            json!(join_lines(&fields.responsibilities)),
        );
    }
    if !fields.keywords.is_empty() {
        payload.insert("Keywords".to_string(), json!(join_commas(&fields.keywords)));
    }
    if !fields.tech_stack.is_empty() {
        payload.insert("TechStack".to_string(), json!(join_commas(&fields.tech_stack)));
    }
    Ok(payload)
}

/// Marks a record FAILED; its own write errors are logged, not propagated.
async fn mark_failed(jd_writer: &SchemaWriter<'_>, record_id: &str, err: &PipelineError) {
    let mut fields = Map::new();
    fields.insert("ScoringStatus".to_string(), json!("FAILED"));
    fields.insert(
        "SkipReason".to_string(),
        json!(truncate_chars(&err.to_string(), MAX_SKIP_REASON_LEN)),
    );
    if let Err(e) = jd_writer.update(record_id, fields).await {
        warn!("FAIL_MARK_FAILED record={} error={}", record_id, e);
    }
}

fn join_lines(items: &[String]) -> String {
    items.join("\n")
}

fn join_commas(items: &[String]) -> String {
    items.join(", ")
}

/// First occurrence wins; order preserved.
fn dedup_notes(notes: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    notes
        .into_iter()
        .filter(|n| !n.trim().is_empty() && seen.insert(n.clone()))
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use engine::EngineKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // ── stubs ───────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MemStore {
        records: Mutex<HashMap<String, Map<String, Value>>>,
        create_calls: Mutex<u32>,
    }

    impl MemStore {
        fn seed(&self, id: &str, fields: Value) {
            self.records
                .lock()
                .unwrap()
                .insert(id.to_string(), fields.as_object().unwrap().clone());
        }

        fn fields_of(&self, id: &str) -> Map<String, Value> {
            self.records.lock().unwrap().get(id).cloned().unwrap_or_default()
        }

        fn record(&self, id: &str) -> Record {
            Record {
                id: id.to_string(),
                fields: self.fields_of(id),
            }
        }
    }

    #[async_trait]
    impl RecordStore for MemStore {
        async fn create(
            &self,
            _table: &str,
            fields: Map<String, Value>,
        ) -> Result<Record, StoreError> {
            *self.create_calls.lock().unwrap() += 1;
            let id = format!("rec{}", self.records.lock().unwrap().len() + 1);
            self.records.lock().unwrap().insert(id.clone(), fields.clone());
            Ok(Record { id, fields })
        }

        async fn update(
            &self,
            _table: &str,
            id: &str,
            fields: Map<String, Value>,
        ) -> Result<Record, StoreError> {
            let mut records = self.records.lock().unwrap();
            let entry = records.entry(id.to_string()).or_default();
            for (k, v) in fields {
                entry.insert(k, v);
            }
            Ok(Record {
                id: id.to_string(),
                fields: entry.clone(),
            })
        }

        async fn get(&self, _table: &str, id: &str) -> Result<Record, StoreError> {
            Ok(self.record(id))
        }

        async fn find_one(
            &self,
            table: &str,
            field: &str,
            value: &str,
        ) -> Result<Option<Record>, StoreError> {
            // crude table separation: candidate records carry ProfileID
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|(_, f)| {
                    if table == "CandidateProfile" {
                        f.contains_key("ProfileID")
                    } else {
                        !f.contains_key("ProfileID")
                    }
                })
                .find(|(_, f)| f.get(field).and_then(Value::as_str) == Some(value))
                .map(|(id, f)| Record {
                    id: id.clone(),
                    fields: f.clone(),
                }))
        }

        async fn list(
            &self,
            _table: &str,
            max_records: u32,
            filter: Option<&str>,
        ) -> Result<Vec<Record>, StoreError> {
            // filterless lists are schema-discovery samples; an empty sample
            // leaves the writer's filtering disabled
            if filter.is_none() {
                return Ok(Vec::new());
            }
            let records = self.records.lock().unwrap();
            let mut ids: Vec<&String> = records
                .keys()
                .filter(|id| !records[*id].contains_key("ProfileID"))
                .collect();
            ids.sort();
            Ok(ids
                .into_iter()
                .take(max_records as usize)
                .map(|id| Record {
                    id: id.clone(),
                    fields: records[id].clone(),
                })
                .collect())
        }
    }

    /// Routes by prompt shape: scorer prompts carry the INPUT_JSON envelope,
    /// everything else is treated as a structuring call.
    struct RoutingClient {
        parse_calls: Mutex<u32>,
        score_calls: Mutex<u32>,
        fit_score: u8,
    }

    impl RoutingClient {
        fn new(fit_score: u8) -> Self {
            Self {
                parse_calls: Mutex::new(0),
                score_calls: Mutex::new(0),
                fit_score,
            }
        }
    }

    #[async_trait]
    impl CompletionClient for RoutingClient {
        async fn complete(
            &self,
            _model: &str,
            prompt: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<String, LlmError> {
            if prompt.contains("INPUT_JSON:") {
                *self.score_calls.lock().unwrap() += 1;
                Ok(json!({
                    "fit_score": self.fit_score,
                    "next_action": "Apply",
                    "fit_reasons": ["solid overlap"],
                    "gaps_risks": ["limited domain exposure"],
                    "non_obvious_matches": [],
                    "keywords_to_tailor_resume": ["rust"],
                    "questions_to_verify": [],
                    "confidence": 0.8,
                    "needs_human_input": [],
                    "debug": {"overlap_count": 2}
                })
                .to_string())
            } else {
                *self.parse_calls.lock().unwrap() += 1;
                Ok(json!({
                    "company": "Acme",
                    "job_title": "Rust Engineer",
                    "location": "Remote",
                    "remote_status": "Remote",
                    "seniority": "Senior",
                    "apply_type": "External",
                    "requirements": ["Rust"],
                    "responsibilities": ["Build services"],
                    "keywords": ["rust"],
                    "tech_stack": ["Rust"],
                    "needs_human_input": []
                })
                .to_string())
            }
        }
    }

    fn seed_candidate(store: &MemStore) {
        store.seed(
            "recCAND",
            json!({
                "ProfileID": "ME",
                "CandidateJSON": "{\"skills\": [\"rust\"]}"
            }),
        );
    }

    fn context<'a>(store: &'a MemStore, llm: &'a RoutingClient) -> ScoringContext<'a> {
        ScoringContext {
            store,
            llm,
            jobs_table: "Jobs",
            candidate_table: "CandidateProfile",
            parse_model: "parse-model",
            score_model: "score-model",
            engines: vec![ScorerEngine::load(EngineKind::V1, std::path::Path::new("prompts"))
                .unwrap()],
            dry_run: false,
            record_delay: Duration::ZERO,
        }
    }

    // ── run id and helpers ──────────────────────────────────────────────────

    #[test]
    fn test_run_id_format() {
        let run_id = generate_run_id();
        assert!(run_id.starts_with("RUN_"));
        assert!(run_id.ends_with('Z'));
        // RUN_ + 2026-08-26T12-00-00Z
        assert_eq!(run_id.len(), 4 + 20);
    }

    #[test]
    fn test_dedup_notes_keeps_first_occurrence() {
        let notes = vec![
            "A".to_string(),
            "B".to_string(),
            "A".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(dedup_notes(notes), vec!["A", "B"]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
    }

    // ── record state machine ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_record_without_description_is_terminal_skip() {
        let store = MemStore::default();
        seed_candidate(&store);
        store.seed("recJOB", json!({"JobURL": "https://x/1"}));
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);
        let jd_writer = SchemaWriter::discover(&store, "Jobs", false).await;
        let candidate = load_candidate_profile(&ctx).await.unwrap();

        let outcome = score_job_record(&ctx, &jd_writer, &candidate, &store.record("recJOB"), "RUN_T")
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Skipped);
        let fields = store.fields_of("recJOB");
        assert_eq!(fields["Status"], "Needs JD");
        assert_eq!(fields["ScoringStatus"], "SKIPPED");
        assert_eq!(fields["SkipReason"], "No job description");
        assert_eq!(*llm.parse_calls.lock().unwrap(), 0);
        assert_eq!(*llm.score_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_description_that_cleans_to_empty_is_terminal_skip() {
        let store = MemStore::default();
        seed_candidate(&store);
        store.seed(
            "recJOB",
            json!({"JobURL": "https://x/1", "JobDescriptionRaw": "<style>.a{color:red}</style>"}),
        );
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);
        let jd_writer = SchemaWriter::discover(&store, "Jobs", false).await;
        let candidate = load_candidate_profile(&ctx).await.unwrap();

        let outcome = score_job_record(&ctx, &jd_writer, &candidate, &store.record("recJOB"), "RUN_T")
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Skipped);
        assert_eq!(store.fields_of("recJOB")["Status"], "Needs JD");
        assert_eq!(*llm.parse_calls.lock().unwrap(), 0);
        assert_eq!(*llm.score_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_record_scores_and_persists() {
        let store = MemStore::default();
        seed_candidate(&store);
        let long_jd = format!("<p>{}</p>", "Build Rust services at scale. ".repeat(30));
        store.seed("recJOB", json!({"JobURL": "https://x/1", "JobDescriptionRaw": long_jd}));
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);
        let jd_writer = SchemaWriter::discover(&store, "Jobs", false).await;
        let candidate = load_candidate_profile(&ctx).await.unwrap();

        let outcome = score_job_record(&ctx, &jd_writer, &candidate, &store.record("recJOB"), "RUN_T")
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Scored);
        let fields = store.fields_of("recJOB");
        assert_eq!(fields["FitScore"], 4);
        assert_eq!(fields["Status"], "Scored");
        assert_eq!(fields["ScoringStatus"], "SCORED");
        assert_eq!(fields["RunID"], "RUN_T");
        assert_eq!(fields["NextAction"], "Apply");
        assert_eq!(fields["Company"], "Acme");
        assert!(fields["JobDescriptionText"]
            .as_str()
            .unwrap()
            .contains("Build Rust services"));
        assert!(fields.contains_key("JobJSON"));
        assert_eq!(fields["FitReasons"], "solid overlap");
        assert_eq!(*llm.parse_calls.lock().unwrap(), 1);
        assert_eq!(*llm.score_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cached_text_and_jobjson_skip_llm_parse() {
        let store = MemStore::default();
        seed_candidate(&store);
        let cached_fields = JobFields::fallback(Some("Cached Title".to_string()));
        let cached_json = serde_json::to_string(&cached_fields).unwrap();
        let cached_text = "Already cleaned description text. ".repeat(25);
        store.seed(
            "recJOB",
            json!({
                "JobURL": "https://x/1",
                "JobDescriptionRaw": "<p>ignored, cache wins</p>",
                "JobDescriptionText": cached_text,
                "JobJSON": cached_json
            }),
        );
        let llm = RoutingClient::new(3);
        let ctx = context(&store, &llm);
        let jd_writer = SchemaWriter::discover(&store, "Jobs", false).await;
        let candidate = load_candidate_profile(&ctx).await.unwrap();

        let outcome = score_job_record(&ctx, &jd_writer, &candidate, &store.record("recJOB"), "RUN_T")
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Scored);
        // cached stages reused: exactly one LLM call, the scorer
        assert_eq!(*llm.parse_calls.lock().unwrap(), 0);
        assert_eq!(*llm.score_calls.lock().unwrap(), 1);
        let fields = store.fields_of("recJOB");
        assert_eq!(fields["NextAction"], "Network First");
        // the cached fallback marker flows into the merged notes
        assert!(fields["NeedsHumanInput"]
            .as_str()
            .unwrap()
            .contains(structurer::PARSE_FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_short_description_scores_with_advisory() {
        let store = MemStore::default();
        seed_candidate(&store);
        store.seed(
            "recJOB",
            json!({"JobURL": "https://x/1", "JobDescriptionRaw": "<p>Short JD.</p>"}),
        );
        let llm = RoutingClient::new(5);
        let ctx = context(&store, &llm);
        let jd_writer = SchemaWriter::discover(&store, "Jobs", false).await;
        let candidate = load_candidate_profile(&ctx).await.unwrap();

        let outcome = score_job_record(&ctx, &jd_writer, &candidate, &store.record("recJOB"), "RUN_T")
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Scored);
        let fields = store.fields_of("recJOB");
        assert_eq!(fields["FitScore"], 5);
        assert_eq!(fields["NextAction"], "Apply Now");
        assert!(fields["NeedsHumanInput"]
            .as_str()
            .unwrap()
            .contains("SHORT_JD_SCORING"));
    }

    // ── candidate profile gate ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_candidate_profile_fails_run() {
        let store = MemStore::default();
        let llm = RoutingClient::new(3);
        let ctx = context(&store, &llm);
        let err = run_scoring(&ctx, 10).await.unwrap_err();
        assert!(matches!(err, PipelineError::Candidate(_)));
    }

    #[tokio::test]
    async fn test_invalid_candidate_json_fails_run() {
        let store = MemStore::default();
        store.seed(
            "recCAND",
            json!({"ProfileID": "ME", "CandidateJSON": "not json"}),
        );
        let llm = RoutingClient::new(3);
        let ctx = context(&store, &llm);
        let err = run_scoring(&ctx, 10).await.unwrap_err();
        assert!(matches!(err, PipelineError::Candidate(_)));
    }

    // ── intake ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_intake_duplicate_url_skips_creation() {
        let store = MemStore::default();
        seed_candidate(&store);
        store.seed("recJOB", json!({"JobURL": "https://x/dup"}));
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);

        let outcome = run_single_intake(&ctx, "https://x/dup", None).await.unwrap();

        assert_eq!(outcome, IntakeOutcome::Duplicate("recJOB".to_string()));
        assert_eq!(*store.create_calls.lock().unwrap(), 0);
        assert_eq!(*llm.score_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_intake_new_url_creates_and_scores() {
        let store = MemStore::default();
        seed_candidate(&store);
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);
        let long_jd = "A long enough raw description. ".repeat(30);

        let outcome = run_single_intake(&ctx, "https://x/new", Some(long_jd))
            .await
            .unwrap();

        let IntakeOutcome::Scored(id) = outcome else {
            panic!("expected scored intake, got {outcome:?}");
        };
        assert_eq!(*store.create_calls.lock().unwrap(), 1);
        let fields = store.fields_of(&id);
        assert_eq!(fields["JobURL"], "https://x/new");
        assert_eq!(fields["Source"], "manual");
        assert_eq!(fields["FitScore"], 4);
    }

    #[tokio::test]
    async fn test_intake_without_description_is_skipped() {
        let store = MemStore::default();
        seed_candidate(&store);
        let llm = RoutingClient::new(4);
        let ctx = context(&store, &llm);

        let outcome = run_single_intake(&ctx, "https://x/bare", None).await.unwrap();

        let IntakeOutcome::Skipped(id) = outcome else {
            panic!("expected skipped intake, got {outcome:?}");
        };
        let fields = store.fields_of(&id);
        assert_eq!(fields["Status"], "Needs JD");
    }
}
