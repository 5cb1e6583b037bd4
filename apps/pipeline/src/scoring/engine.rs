//! Scorer Engine — named, swappable strategies for producing a validated
//! fit assessment from the same scorer-input envelope.
//!
//! Each engine binds a name to a prompt template and a fixed required-key
//! contract. Model output is parsed then validated; one strict-JSON retry is
//! allowed on schema violation, after which the record fails hard. All
//! normalization (score clamping, action mapping, confidence coercion) is
//! deterministic and lives here, not at call sites.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::llm_client::{parse_loose_json, CompletionClient, LlmError};
use crate::scoring::flags::JdFlags;
use crate::scoring::prompts::{JOB_SCORER_PROMPT_V1, STRICT_JSON_RETRY_INSTRUCTION};
use crate::scoring::structurer::{string_list, JobFields};

/// Contractual default when the model omits or mangles the fit score.
pub const DEFAULT_FIT_SCORE: u8 = 3;

/// Alias resolution for the fit score field, in probe order. One explicit
/// table instead of ad hoc key probing at call sites.
const FIT_SCORE_ALIASES: [&str; 4] = ["fit_score", "score", "FitScore", "fitScore"];

/// Every engine must return all of these keys or the response is rejected.
const REQUIRED_KEYS: [&str; 10] = [
    "fit_score",
    "next_action",
    "fit_reasons",
    "gaps_risks",
    "non_obvious_matches",
    "keywords_to_tailor_resume",
    "questions_to_verify",
    "confidence",
    "needs_human_input",
    "debug",
];

const SCORER_MAX_TOKENS: u32 = 1000;
const PRECISION_PROMPT_FILE: &str = "job_scorer_precision_v1.txt";

#[derive(Debug, Error)]
pub enum EngineFailure {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("invalid model output from engine {engine}")]
    InvalidModelOutput { engine: &'static str },

    #[error("failed to serialize scorer input: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Engine identity. Unknown names are a hard configuration error at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Default heuristic prompt engine (embedded template).
    V1,
    /// Higher-fidelity engine with explicit hard-gate signaling
    /// (template loaded from the prompts directory).
    PrecisionV1,
}

impl EngineKind {
    pub const PREFERRED: EngineKind = EngineKind::PrecisionV1;

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::V1 => "v1",
            EngineKind::PrecisionV1 => "precision_v1",
        }
    }

    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        match s.trim() {
            "v1" => Ok(EngineKind::V1),
            "precision_v1" => Ok(EngineKind::PrecisionV1),
            other => Err(PipelineError::Config(format!(
                "Unknown scorer engine: {other}"
            ))),
        }
    }

    /// Whether this engine's debug payload carries explicit hard-gate fields.
    pub fn has_explicit_gates(self) -> bool {
        matches!(self, EngineKind::PrecisionV1)
    }
}

/// Canonical next action. Any other token from the model is replaced by the
/// deterministic fit-score mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NextAction {
    #[serde(rename = "Apply Now")]
    ApplyNow,
    Apply,
    #[serde(rename = "Network First")]
    NetworkFirst,
    Skip,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::ApplyNow => "Apply Now",
            NextAction::Apply => "Apply",
            NextAction::NetworkFirst => "Network First",
            NextAction::Skip => "Skip",
        }
    }

    /// Exact match against the four canonical literals.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Apply Now" => Some(NextAction::ApplyNow),
            "Apply" => Some(NextAction::Apply),
            "Network First" => Some(NextAction::NetworkFirst),
            "Skip" => Some(NextAction::Skip),
            _ => None,
        }
    }

    /// The single canonical fit-score mapping. Gate-driven Skip overrides are
    /// an arbitration rule, never folded in here.
    pub fn from_fit_score(fit_score: u8) -> Self {
        match fit_score {
            5 => NextAction::ApplyNow,
            4 => NextAction::Apply,
            3 | 2 => NextAction::NetworkFirst,
            _ => NextAction::Skip,
        }
    }
}

/// Model self-assessed confidence, coerced to [0, 1] or the unknown sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confidence {
    Known(f64),
    Unknown,
}

impl Confidence {
    pub fn label(self) -> String {
        match self {
            Confidence::Known(v) => format!("{v:.2}"),
            Confidence::Unknown => "unknown".to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scorer-input envelope
// ────────────────────────────────────────────────────────────────────────────

/// Job-side view assembled from structured fields, flags, and cleaned text.
#[derive(Debug, Clone, Serialize)]
pub struct JobProfile {
    pub title: String,
    pub company: String,
    pub location: String,
    pub employment_type: String,
    pub role_family_guess: String,
    pub responsibilities: Vec<String>,
    pub required_qualifications: Vec<String>,
    pub preferred_qualifications: Vec<String>,
    pub tech_stack: Vec<String>,
    pub industry: String,
    pub flags: JdFlags,
    pub raw_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateEnvelope {
    pub candidate_profile: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEnvelope {
    pub job_profile: JobProfile,
    pub job_json: JobFields,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeParams {
    pub creativity_dial: f64,
    pub model: String,
    pub temperature: f64,
    pub run_id: String,
}

/// The full envelope appended to every engine's prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ScorerInput {
    pub candidate: CandidateEnvelope,
    pub job: JobEnvelope,
    pub runtime: RuntimeParams,
}

// ────────────────────────────────────────────────────────────────────────────
// Result
// ────────────────────────────────────────────────────────────────────────────

/// Validated, normalized result of one engine invocation. `raw` preserves the
/// full model output (including the debug sub-object) for audit/arbitration.
#[derive(Debug, Clone)]
pub struct ScoringResult {
    pub engine: EngineKind,
    pub fit_score: u8,
    pub next_action: NextAction,
    pub fit_reasons: Vec<String>,
    pub gaps_risks: Vec<String>,
    pub needs_human_input: Vec<String>,
    pub confidence: Confidence,
    pub raw: Value,
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

/// A scorer engine: a name bound to a prompt template.
#[derive(Debug)]
pub struct ScorerEngine {
    kind: EngineKind,
    template: String,
}

impl ScorerEngine {
    /// Binds the engine's template. The precision engine loads its template
    /// from the prompts directory; a missing or unreadable file is a hard
    /// configuration error.
    pub fn load(kind: EngineKind, prompt_dir: &Path) -> Result<Self, PipelineError> {
        let template = match kind {
            EngineKind::V1 => JOB_SCORER_PROMPT_V1.to_string(),
            EngineKind::PrecisionV1 => {
                let path = prompt_dir.join(PRECISION_PROMPT_FILE);
                std::fs::read_to_string(&path).map_err(|e| {
                    PipelineError::Config(format!(
                        "PROMPT_FILE_MISSING engine={} path={} error={e}",
                        kind.name(),
                        path.display()
                    ))
                })?
            }
        };
        Ok(Self { kind, template })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// SHA-256 of the template, first 16 hex chars. Logged at run start and
    /// embedded in the comparison artifact.
    pub fn prompt_hash(&self) -> String {
        let digest = Sha256::digest(self.template.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Invokes the engine once, with exactly one strict-JSON retry on an
    /// unparsable or key-incomplete response. No third attempt.
    pub async fn run(
        &self,
        llm: &dyn CompletionClient,
        input: &ScorerInput,
    ) -> Result<ScoringResult, EngineFailure> {
        let envelope = serde_json::to_string(input)?;
        let full_prompt = format!("{}\n\nINPUT_JSON:\n{}", self.template, envelope);

        let text = llm
            .complete(
                &input.runtime.model,
                &full_prompt,
                SCORER_MAX_TOKENS,
                input.runtime.temperature,
            )
            .await?;
        let mut parsed = parse_loose_json(&text).filter(has_required_keys);

        if parsed.is_none() {
            let retry_prompt = format!("{full_prompt}{STRICT_JSON_RETRY_INSTRUCTION}");
            let text = llm
                .complete(
                    &input.runtime.model,
                    &retry_prompt,
                    SCORER_MAX_TOKENS,
                    input.runtime.temperature,
                )
                .await?;
            parsed = parse_loose_json(&text).filter(has_required_keys);
        }

        let Some(raw) = parsed else {
            warn!("FAIL_BAD_MODEL_OUTPUT engine={}", self.kind.name());
            return Err(EngineFailure::InvalidModelOutput {
                engine: self.kind.name(),
            });
        };

        Ok(normalize_result(self.kind, raw))
    }
}

fn has_required_keys(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => REQUIRED_KEYS.iter().all(|k| obj.contains_key(*k)),
        None => false,
    }
}

/// Applies the full normalization contract to a schema-valid raw response.
fn normalize_result(kind: EngineKind, raw: Value) -> ScoringResult {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);

    let fit_score = resolve_fit_score(obj);
    let next_action = validate_next_action(obj.get("next_action"), fit_score);
    let confidence = normalize_confidence(obj.get("confidence"));

    let result = ScoringResult {
        engine: kind,
        fit_score,
        next_action,
        fit_reasons: string_list(obj.get("fit_reasons")),
        gaps_risks: string_list(obj.get("gaps_risks")),
        needs_human_input: string_list(obj.get("needs_human_input")),
        confidence,
        raw: raw.clone(),
    };

    info!(
        "SCORER_RESULT engine={} fit={} action={} conf={}",
        kind.name(),
        result.fit_score,
        result.next_action.as_str(),
        result.confidence.label()
    );

    result
}

/// Resolves the fit score through the alias table and clamps it to [1, 5].
/// Non-numeric or absent input yields the contractual default (3).
pub fn resolve_fit_score(obj: &Map<String, Value>) -> u8 {
    let raw = FIT_SCORE_ALIASES
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()));

    let score = match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(i64::from(DEFAULT_FIT_SCORE)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .unwrap_or(i64::from(DEFAULT_FIT_SCORE)),
        _ => i64::from(DEFAULT_FIT_SCORE),
    };

    score.clamp(1, 5) as u8
}

/// Validates the model's next action against the canonical set, substituting
/// the deterministic fit-score mapping on any other token.
pub fn validate_next_action(raw: Option<&Value>, fit_score: u8) -> NextAction {
    raw.and_then(Value::as_str)
        .and_then(NextAction::parse)
        .unwrap_or_else(|| NextAction::from_fit_score(fit_score))
}

/// Coerces confidence to a float in [0, 1], or Unknown when not parseable.
pub fn normalize_confidence(raw: Option<&Value>) -> Confidence {
    let value = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() => Confidence::Known(v.clamp(0.0, 1.0)),
        _ => Confidence::Unknown,
    }
}
