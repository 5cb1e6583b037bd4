// All LLM prompt constants for the scoring module.
// Templates are parameterized with <<...>> placeholders or an appended
// INPUT_JSON envelope; the literal wording is owned by the prompt files and
// constants here, nowhere else.

/// Job structuring prompt. Replace `<<JOB_DESCRIPTION>>` before sending.
pub const JOB_PARSE_PROMPT: &str = r#"You are a job-post parser. Extract structured fields from a raw job description.

STRICT RULES:
- Output ONLY valid JSON. No markdown. No extra text.
- Do NOT hallucinate or invent facts.
- If unknown or missing, use null (not empty string) and add a short note to needs_human_input[].

Return JSON with EXACTLY this schema:
{
  "company": null,
  "job_title": null,
  "location": null,
  "remote_status": "Remote|Hybrid|Onsite|Unknown",
  "seniority": "Entry|Mid|Senior|Lead|Unknown",
  "apply_type": "EasyApply|External|Unknown",
  "requirements": [],
  "responsibilities": [],
  "keywords": [],
  "tech_stack": [],
  "needs_human_input": []
}

RAW JOB DESCRIPTION:
<<JOB_DESCRIPTION>>
"#;

/// Baseline scorer engine template. The serialized scorer-input envelope is
/// appended under an `INPUT_JSON:` header at call time.
pub const JOB_SCORER_PROMPT_V1: &str = r#"You are a job-candidate fit scoring engine for an automated application pipeline.

SCORING FRAMEWORK (fit_score):
5 = Exceptional match - Immediate apply. Core capabilities align strongly, minimal gaps.
4 = Strong match - Apply. Most requirements met, minor gaps manageable.
3 = Moderate match - Network first. Partial capability match, notable gaps but potential.
2 = Weak match - Network first. Significant capability gaps, limited alignment.
1 = Poor match - Skip. Fundamental misalignment or hard blockers.

NEXT ACTION DETERMINISM (map from fit_score):
fit_score=5 -> next_action="Apply Now"
fit_score=4 -> next_action="Apply"
fit_score=3 -> next_action="Network First"
fit_score=2 -> next_action="Network First"
fit_score=1 -> next_action="Skip"

ANALYSIS REQUIREMENTS:
1. Capability match: compare candidate skills/tools/domains against job requirements.
2. Non-obvious matches: surface transferable skills and adjacent domains.
3. Gap and risk assessment: missing must-haves, clearance/location blockers.
4. Resume tailoring keywords: 5-10 high-value terms from the job description.
5. Verification questions: 2-5 questions requiring human judgment.
6. Confidence: self-assess scoring confidence (0.0-1.0).

STRICT OUTPUT RULES:
- Output ONLY valid JSON matching the exact schema below.
- Do NOT invent candidate experience or capabilities not in the input.
- Use the provided candidate_profile and job_profile ONLY.
- If critical information is missing, note it in needs_human_input.

EXPECTED JSON SCHEMA:
{
  "fit_score": 1-5 (integer),
  "next_action": "Apply Now" | "Apply" | "Network First" | "Skip",
  "fit_reasons": ["reason1", "reason2"],
  "gaps_risks": ["gap1", "risk1"],
  "non_obvious_matches": ["match1"],
  "keywords_to_tailor_resume": ["keyword1"],
  "questions_to_verify": ["question1"],
  "confidence": 0.0-1.0 (float),
  "needs_human_input": ["item1"],
  "debug": {
    "candidate_core_skills": ["skill1"],
    "job_must_haves": ["requirement1"],
    "overlap_count": 0,
    "gap_count": 0
  }
}

Analyze deeply. Output strict JSON only.
"#;

/// Appended to the full prompt on the single schema-violation retry.
pub const STRICT_JSON_RETRY_INSTRUCTION: &str =
    "\n\nYou produced invalid JSON or missing keys. Output STRICT JSON ONLY matching the exact schema.";
