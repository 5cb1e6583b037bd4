//! Arbitration Unit — selects one deterministic winner when multiple scorer
//! engines are run for the same record, and builds the size-bounded
//! comparison artifact persisted alongside the score.
//!
//! A hard-gate failure (clearance, citizenship, travel, location blockers) is
//! authoritative: a single gating engine wins outright, its Skip verdict
//! overriding any higher score from the other engine.

use serde_json::{json, Value};
use tracing::info;

use crate::scoring::engine::{EngineKind, RuntimeParams, ScoringResult};

/// Serialized artifact size cap in characters.
const MAX_ARTIFACT_LEN: usize = 90_000;

/// Keyword heuristic for engines without explicit gate signaling.
const GATE_KEYWORDS: [&str; 6] = [
    "clearance",
    "security clearance",
    "government",
    "travel",
    "relocation",
    "on-site",
];

/// Outcome of arbitrating a multi-engine run.
#[derive(Debug)]
pub struct AbComparison {
    /// Index into the results slice, in invocation order.
    pub winner: usize,
    /// Hard-gate flag per engine, same order as the results.
    pub gate_failures: Vec<bool>,
    /// Serialized, size-capped comparison artifact (sorted keys).
    pub artifact: String,
}

/// Detects whether an engine's result indicates a hard-gate failure.
///
/// Engines with explicit gate signaling: `debug.hard_gates_passed == false`,
/// or fit score 1 with non-empty `debug.hard_gate_fail_reasons`. Other
/// engines: fit score 1 co-occurring with gate keywords anywhere in the
/// combined gaps/needs-human-input text.
pub fn is_hard_gate_failure(result: &ScoringResult) -> bool {
    if result.engine.has_explicit_gates() {
        let debug = &result.raw["debug"];
        let gates_passed = debug["hard_gates_passed"].as_bool().unwrap_or(true);
        if !gates_passed {
            return true;
        }
        let fail_reasons = debug["hard_gate_fail_reasons"]
            .as_array()
            .map(|a| !a.is_empty())
            .unwrap_or(false);
        return result.fit_score == 1 && fail_reasons;
    }

    if result.fit_score != 1 {
        return false;
    }
    let combined = result
        .gaps_risks
        .iter()
        .chain(result.needs_human_input.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    GATE_KEYWORDS.iter().any(|kw| combined.contains(kw))
}

/// Deterministic winner selection. No randomness:
/// 1. Any-but-not-all engines gate-fail: first gating engine wins.
/// 2. All gate-fail: the preferred engine if present, else the first.
/// 3. No gate failures: strictly highest fit score; exact ties prefer the
///    preferred engine.
pub fn select_winner(results: &[ScoringResult], gate_failures: &[bool]) -> usize {
    let failing: Vec<usize> = gate_failures
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.then_some(i))
        .collect();

    if !failing.is_empty() {
        if failing.len() == results.len() {
            return failing
                .iter()
                .copied()
                .find(|&i| results[i].engine == EngineKind::PREFERRED)
                .unwrap_or(failing[0]);
        }
        return failing[0];
    }

    let mut winner = 0;
    for (i, result) in results.iter().enumerate().skip(1) {
        if result.fit_score > results[winner].fit_score
            || (result.fit_score == results[winner].fit_score
                && result.engine == EngineKind::PREFERRED)
        {
            winner = i;
        }
    }
    winner
}

/// Runs the full arbitration: gate detection, winner selection, artifact.
/// `hashes` pairs each engine name with its prompt-content hash.
pub fn arbitrate(
    results: &[ScoringResult],
    hashes: &[(String, String)],
    runtime: &RuntimeParams,
) -> AbComparison {
    let gate_failures: Vec<bool> = results.iter().map(is_hard_gate_failure).collect();
    let winner = select_winner(results, &gate_failures);
    let artifact = build_artifact(results, hashes, winner, runtime);

    info!(
        "AB_COMPARE engines={} winner={}",
        results
            .iter()
            .map(|r| r.engine.name())
            .collect::<Vec<_>>()
            .join(","),
        results[winner].engine.name()
    );

    AbComparison {
        winner,
        gate_failures,
        artifact,
    }
}

/// Serializes all engines' full results plus winner, hashes, and runtime
/// metadata. Keys are sorted (serde_json's default map ordering) for
/// determinism. Over-cap artifacts are truncated in two stages: strip the
/// debug sub-object from every non-winner, then collapse to winner-only.
fn build_artifact(
    results: &[ScoringResult],
    hashes: &[(String, String)],
    winner: usize,
    runtime: &RuntimeParams,
) -> String {
    let winner_name = results[winner].engine.name();

    let mut engines = serde_json::Map::new();
    for result in results {
        engines.insert(result.engine.name().to_string(), result.raw.clone());
    }

    let hash_map: serde_json::Map<String, Value> = hashes
        .iter()
        .map(|(name, hash)| (name.clone(), Value::String(hash.clone())))
        .collect();

    let runtime_obj = json!({
        "model": runtime.model,
        "temperature": runtime.temperature,
        "timestamp_utc": chrono::Utc::now().to_rfc3339(),
    });

    let mut output = json!({
        "engines": engines,
        "winner": winner_name,
        "winner_fit_score": results[winner].fit_score,
        "winner_next_action": results[winner].next_action.as_str(),
        "hashes": hash_map,
        "runtime": runtime_obj,
    });

    let serialized = output.to_string();
    if serialized.len() <= MAX_ARTIFACT_LEN {
        return serialized;
    }

    // Stage 1: drop debug payloads from non-winning engines
    output["TRUNCATED"] = json!(true);
    output["TRUNCATED_REASON"] = json!(format!(
        "JSON size {} exceeded max {MAX_ARTIFACT_LEN}",
        serialized.len()
    ));
    if let Some(engines) = output["engines"].as_object_mut() {
        for (name, entry) in engines.iter_mut() {
            if name != winner_name {
                if let Some(obj) = entry.as_object_mut() {
                    obj.remove("debug");
                }
            }
        }
    }

    let serialized = output.to_string();
    if serialized.len() <= MAX_ARTIFACT_LEN {
        return serialized;
    }

    // Stage 2: keep only the winner's full result
    json!({
        "engines": { winner_name: output["engines"][winner_name] },
        "winner": winner_name,
        "hashes": output["hashes"],
        "runtime": output["runtime"],
        "TRUNCATED": true,
        "TRUNCATED_REASON": "Aggressive truncation: kept only winner engine",
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::engine::{Confidence, NextAction};
    use serde_json::json;

    fn result(
        engine: EngineKind,
        fit_score: u8,
        gaps_risks: Vec<&str>,
        raw: Value,
    ) -> ScoringResult {
        ScoringResult {
            engine,
            fit_score,
            next_action: NextAction::from_fit_score(fit_score),
            fit_reasons: vec![],
            gaps_risks: gaps_risks.into_iter().map(String::from).collect(),
            needs_human_input: vec![],
            confidence: Confidence::Unknown,
            raw,
        }
    }

    fn runtime() -> RuntimeParams {
        RuntimeParams {
            creativity_dial: 0.7,
            model: "test-model".into(),
            temperature: 0.7,
            run_id: "RUN_TEST".into(),
        }
    }

    #[test]
    fn test_explicit_gates_not_passed_is_failure() {
        let r = result(
            EngineKind::PrecisionV1,
            3,
            vec![],
            json!({"debug": {"hard_gates_passed": false, "hard_gate_fail_reasons": []}}),
        );
        assert!(is_hard_gate_failure(&r));
    }

    #[test]
    fn test_explicit_score_one_with_fail_reasons_is_failure() {
        let r = result(
            EngineKind::PrecisionV1,
            1,
            vec![],
            json!({"debug": {"hard_gates_passed": true, "hard_gate_fail_reasons": ["TS/SCI required"]}}),
        );
        assert!(is_hard_gate_failure(&r));
    }

    #[test]
    fn test_explicit_gates_passed_is_not_failure() {
        let r = result(
            EngineKind::PrecisionV1,
            1,
            vec![],
            json!({"debug": {"hard_gates_passed": true, "hard_gate_fail_reasons": []}}),
        );
        assert!(!is_hard_gate_failure(&r));
    }

    #[test]
    fn test_heuristic_score_one_with_clearance_keyword() {
        let r = result(
            EngineKind::V1,
            1,
            vec!["Requires active security clearance"],
            json!({}),
        );
        assert!(is_hard_gate_failure(&r));
    }

    #[test]
    fn test_heuristic_score_one_without_gate_keywords() {
        let r = result(EngineKind::V1, 1, vec!["Wrong tech stack"], json!({}));
        assert!(!is_hard_gate_failure(&r));
    }

    #[test]
    fn test_heuristic_high_score_with_keywords_is_not_failure() {
        let r = result(
            EngineKind::V1,
            4,
            vec!["Some travel expected"],
            json!({}),
        );
        assert!(!is_hard_gate_failure(&r));
    }

    #[test]
    fn test_gating_engine_beats_higher_score() {
        let a = result(EngineKind::PrecisionV1, 4, vec![], json!({"debug": {}}));
        let b = result(
            EngineKind::V1,
            1,
            vec!["clearance required for this role"],
            json!({}),
        );
        let results = vec![a, b];
        let comparison = arbitrate(&results, &[], &runtime());
        assert_eq!(comparison.winner, 1);
        assert_eq!(results[comparison.winner].next_action, NextAction::Skip);
        assert_eq!(comparison.gate_failures, vec![false, true]);
    }

    #[test]
    fn test_all_gating_prefers_preferred_engine() {
        let a = result(
            EngineKind::V1,
            1,
            vec!["government clearance needed"],
            json!({}),
        );
        let b = result(
            EngineKind::PrecisionV1,
            1,
            vec![],
            json!({"debug": {"hard_gates_passed": false}}),
        );
        let results = vec![a, b];
        let gate_failures: Vec<bool> = results.iter().map(is_hard_gate_failure).collect();
        assert_eq!(select_winner(&results, &gate_failures), 1);
    }

    #[test]
    fn test_no_gates_highest_score_wins() {
        let a = result(EngineKind::V1, 4, vec![], json!({}));
        let b = result(EngineKind::PrecisionV1, 3, vec![], json!({"debug": {}}));
        let results = vec![a, b];
        assert_eq!(select_winner(&results, &[false, false]), 0);
    }

    #[test]
    fn test_exact_tie_prefers_preferred_engine() {
        let a = result(EngineKind::V1, 3, vec![], json!({}));
        let b = result(EngineKind::PrecisionV1, 3, vec![], json!({"debug": {}}));
        let results = vec![a, b];
        assert_eq!(select_winner(&results, &[false, false]), 1);
    }

    #[test]
    fn test_artifact_contains_winner_and_hashes() {
        let a = result(EngineKind::V1, 4, vec![], json!({"fit_score": 4}));
        let b = result(EngineKind::PrecisionV1, 2, vec![], json!({"fit_score": 2, "debug": {}}));
        let hashes = vec![
            ("v1".to_string(), "aaaa".to_string()),
            ("precision_v1".to_string(), "bbbb".to_string()),
        ];
        let comparison = arbitrate(&[a, b], &hashes, &runtime());

        let parsed: Value = serde_json::from_str(&comparison.artifact).unwrap();
        assert_eq!(parsed["winner"], "v1");
        assert_eq!(parsed["winner_fit_score"], 4);
        assert_eq!(parsed["winner_next_action"], "Apply");
        assert_eq!(parsed["hashes"]["precision_v1"], "bbbb");
        assert_eq!(parsed["runtime"]["model"], "test-model");
        assert!(parsed.get("TRUNCATED").is_none());
    }

    #[test]
    fn test_oversized_artifact_strips_non_winner_debug() {
        let big_debug = "x".repeat(100_000);
        let a = result(
            EngineKind::V1,
            2,
            vec![],
            json!({"fit_score": 2, "debug": {"blob": big_debug}}),
        );
        let b = result(
            EngineKind::PrecisionV1,
            4,
            vec![],
            json!({"fit_score": 4, "debug": {}}),
        );
        let comparison = arbitrate(&[a, b], &[], &runtime());

        assert!(comparison.artifact.len() <= MAX_ARTIFACT_LEN);
        let parsed: Value = serde_json::from_str(&comparison.artifact).unwrap();
        assert_eq!(parsed["TRUNCATED"], true);
        assert_eq!(parsed["winner"], "precision_v1");
        // non-winner debug stripped, winner result intact
        assert!(parsed["engines"]["v1"].get("debug").is_none());
        assert_eq!(parsed["engines"]["precision_v1"]["fit_score"], 4);
    }

    #[test]
    fn test_grossly_oversized_artifact_collapses_to_winner_only() {
        let big = "x".repeat(95_000);
        let a = result(
            EngineKind::V1,
            2,
            vec![],
            json!({"fit_score": 2, "notes": big.clone(), "debug": {}}),
        );
        let b = result(
            EngineKind::PrecisionV1,
            4,
            vec![],
            json!({"fit_score": 4, "debug": {}}),
        );
        let comparison = arbitrate(&[a, b], &[], &runtime());

        let parsed: Value = serde_json::from_str(&comparison.artifact).unwrap();
        assert_eq!(parsed["TRUNCATED"], true);
        assert_eq!(
            parsed["TRUNCATED_REASON"],
            "Aggressive truncation: kept only winner engine"
        );
        assert!(parsed["engines"].get("v1").is_none());
        assert_eq!(parsed["engines"]["precision_v1"]["fit_score"], 4);
    }
}
