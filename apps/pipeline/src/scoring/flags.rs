//! Flag Extractor — derives structured signal flags from cleaned job
//! description text via a fixed, case-insensitive pattern table.
//!
//! Pure and deterministic; rules run independently except where precedence is
//! specified (clearance type, travel override).

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Fixed-shape flags object attached to every scored job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JdFlags {
    pub requires_clearance: bool,
    /// "", "TS/SCI", "Secret", or "Clearance" (generic).
    pub clearance_type: String,
    pub requires_us_citizenship: bool,
    pub requires_travel: bool,
    pub travel_percent: Option<u32>,
    pub gov_or_defense: bool,
    pub people_management: bool,
    pub phd_required: bool,
    pub research_only: bool,
}

static RE_CLEARANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ts\s*/\s*sci|ts\s*sci|top secret|secret clearance|security clearance|active clearance|must have (?:a )?clearance|clearance required")
        .expect("constant regex pattern is valid")
});
static RE_TSSCI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)ts\s*/\s*sci|ts\s*sci|top secret").expect("constant regex pattern is valid")
});
static RE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)secret clearance").expect("constant regex pattern is valid")
});
static RE_GENERIC_CLEARANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)security clearance").expect("constant regex pattern is valid")
});
static RE_CITIZENSHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(u\.s\.|us)\s*citizen(ship)?\b|citizenship required|must be a\s+us\s+citizen")
        .expect("constant regex pattern is valid")
});
static RE_TRAVEL_PCT_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:up\s*to\s*)?(\d{1,3})\s*%\s*travel").expect("constant regex pattern is valid")
});
static RE_TRAVEL_PCT_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)travel\s*up\s*to\s*(\d{1,3})\s*%").expect("constant regex pattern is valid")
});
static RE_NO_TRAVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no travel|travel not required)\b").expect("constant regex pattern is valid")
});
static RE_TRAVEL_REQUIRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)travel required|travel as needed|%\s*travel|up\s*to\s*(?:\d{1,3}\s*%)?\s*travel")
        .expect("constant regex pattern is valid")
});
static RE_GOV_DEFENSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(dod|department of defense|defense|federal|government|public sector)\b")
        .expect("constant regex pattern is valid")
});
static RE_PEOPLE_MGMT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)manage\s+a\s+team|people\s+manager|direct\s+reports|management\s+experience|team\s+lead")
        .expect("constant regex pattern is valid")
});
static RE_PHD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)phd\s+required|doctorate\s+required|ph\.d\.?\s+required")
        .expect("constant regex pattern is valid")
});
static RE_RESEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bresearch\b").expect("constant regex pattern is valid"));
static RE_DELIVERY_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(deploy|production|ship|implementation|integration)\b")
        .expect("constant regex pattern is valid")
});

/// Builds flags from cleaned job description text. Empty text yields the
/// default (all-false) flags.
pub fn extract_flags(clean_text: &str) -> JdFlags {
    let mut flags = JdFlags::default();
    if clean_text.is_empty() {
        return flags;
    }

    let t = clean_text;

    if RE_CLEARANCE.is_match(t) {
        flags.requires_clearance = true;
    }

    // Precedence: TS/SCI > Secret > generic
    if RE_TSSCI.is_match(t) {
        flags.clearance_type = "TS/SCI".to_string();
    } else if RE_SECRET.is_match(t) {
        flags.clearance_type = "Secret".to_string();
    } else if RE_GENERIC_CLEARANCE.is_match(t) {
        flags.clearance_type = "Clearance".to_string();
    }

    if RE_CITIZENSHIP.is_match(t) {
        flags.requires_us_citizenship = true;
    }

    let percent_caps = RE_TRAVEL_PCT_BEFORE
        .captures(t)
        .or_else(|| RE_TRAVEL_PCT_AFTER.captures(t));
    if let Some(caps) = &percent_caps {
        flags.travel_percent = caps[1].parse::<u32>().ok();
    }

    let travel_required = percent_caps.is_some() || RE_TRAVEL_REQUIRED.is_match(t);

    // Explicit "no travel" overrides the travel-required default
    if RE_NO_TRAVEL.is_match(t) {
        flags.requires_travel = false;
    } else if travel_required {
        flags.requires_travel = true;
    }

    if RE_GOV_DEFENSE.is_match(t) {
        flags.gov_or_defense = true;
    }
    if RE_PEOPLE_MGMT.is_match(t) {
        flags.people_management = true;
    }
    if RE_PHD.is_match(t) {
        flags.phd_required = true;
    }

    // Research-only requires "research" present AND no delivery terms anywhere
    if RE_RESEARCH.is_match(t) && !RE_DELIVERY_TERMS.is_match(t) {
        flags.research_only = true;
    }

    flags
}
