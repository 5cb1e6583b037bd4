//! Job Structurer — one LLM call converting cleaned text into a structured
//! job-fields object, validated against a fixed required-key set.
//!
//! The model is never retried here: an unparsable or key-incomplete response
//! synthesizes a minimal fallback object from locally available data, with a
//! `JOBJSON_PARSE_FAILED` marker in needs_human_input. Whichever object wins
//! is persisted once and never recomputed for that record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::llm_client::{parse_loose_json, CompletionClient, LlmError};
use crate::scoring::prompts::JOB_PARSE_PROMPT;

/// Marker appended to needs_human_input when structuring falls back.
pub const PARSE_FAILED_MARKER: &str = "JOBJSON_PARSE_FAILED";

const REQUIRED_KEYS: [&str; 11] = [
    "company",
    "job_title",
    "location",
    "remote_status",
    "seniority",
    "apply_type",
    "requirements",
    "responsibilities",
    "keywords",
    "tech_stack",
    "needs_human_input",
];

const PARSE_MAX_TOKENS: u32 = 700;
const PARSE_TEMPERATURE: f64 = 0.0;

/// Structured job fields, as persisted to the JobJSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFields {
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub location: Option<String>,
    pub remote_status: String,
    pub seniority: String,
    pub apply_type: String,
    pub requirements: Vec<String>,
    pub responsibilities: Vec<String>,
    pub keywords: Vec<String>,
    pub tech_stack: Vec<String>,
    pub needs_human_input: Vec<String>,
}

impl JobFields {
    /// Builds fields from a model response, or None when the response is not
    /// an object carrying every required key.
    pub fn from_model_value(value: &Value) -> Option<JobFields> {
        let obj = value.as_object()?;
        if !REQUIRED_KEYS.iter().all(|k| obj.contains_key(*k)) {
            return None;
        }
        Some(JobFields {
            company: opt_string(obj.get("company")),
            job_title: opt_string(obj.get("job_title")),
            location: opt_string(obj.get("location")),
            remote_status: enum_or_unknown(obj.get("remote_status")),
            seniority: enum_or_unknown(obj.get("seniority")),
            apply_type: enum_or_unknown(obj.get("apply_type")),
            requirements: string_list(obj.get("requirements")),
            responsibilities: string_list(obj.get("responsibilities")),
            keywords: string_list(obj.get("keywords")),
            tech_stack: string_list(obj.get("tech_stack")),
            needs_human_input: string_list(obj.get("needs_human_input")),
        })
    }

    /// Minimal fallback built from locally available data only.
    pub fn fallback(existing_title: Option<String>) -> JobFields {
        JobFields {
            company: None,
            job_title: existing_title,
            location: None,
            remote_status: "Unknown".to_string(),
            seniority: "Unknown".to_string(),
            apply_type: "Unknown".to_string(),
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            keywords: Vec::new(),
            tech_stack: Vec::new(),
            needs_human_input: vec![PARSE_FAILED_MARKER.to_string()],
        }
    }
}

/// Outcome of a structuring attempt, distinguishing a clean parse from the
/// local fallback at the type level.
#[derive(Debug, Clone)]
pub enum StructureOutcome {
    Parsed(JobFields),
    Fallback(JobFields),
}

impl StructureOutcome {
    pub fn fields(&self) -> &JobFields {
        match self {
            StructureOutcome::Parsed(f) | StructureOutcome::Fallback(f) => f,
        }
    }

    pub fn into_fields(self) -> JobFields {
        match self {
            StructureOutcome::Parsed(f) | StructureOutcome::Fallback(f) => f,
        }
    }

    pub fn parse_failed(&self) -> bool {
        matches!(self, StructureOutcome::Fallback(_))
    }
}

/// Runs the single structuring call. Transport errors bubble to the record
/// boundary; schema failures fall back locally without a model retry.
pub async fn structure_job(
    llm: &dyn CompletionClient,
    model: &str,
    clean_text: &str,
    existing_title: Option<String>,
) -> Result<StructureOutcome, LlmError> {
    let prompt = JOB_PARSE_PROMPT.replace("<<JOB_DESCRIPTION>>", clean_text);
    let text = llm
        .complete(model, &prompt, PARSE_MAX_TOKENS, PARSE_TEMPERATURE)
        .await?;

    match parse_loose_json(&text).and_then(|v| JobFields::from_model_value(&v)) {
        Some(fields) => Ok(StructureOutcome::Parsed(fields)),
        None => {
            warn!("{PARSE_FAILED_MARKER}");
            Ok(StructureOutcome::Fallback(JobFields::fallback(
                existing_title,
            )))
        }
    }
}

fn opt_string(raw: Option<&Value>) -> Option<String> {
    raw.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn enum_or_unknown(raw: Option<&Value>) -> String {
    opt_string(raw).unwrap_or_else(|| "Unknown".to_string())
}

pub(crate) fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
