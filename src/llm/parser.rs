//! Parser for free-text analysis responses
//!
//! The analysis service answers in prose with headed sections. Parsing never
//! fails: whatever could not be recovered is reported through [`ParseStatus`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::context::clamp_unit;

/// How much of a response could be recovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseStatus {
    /// Every section was present
    Complete,
    /// Some sections were missing
    Partial { missing: Vec<String> },
    /// No section heading was found
    Unparsed,
    /// The service was unavailable; fields hold a minimal default
    Fallback,
}

impl ParseStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, ParseStatus::Complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Explanation,
    RootCauses,
    RemediationSteps,
    PreventionStrategies,
    Confidence,
}

impl Section {
    const ALL: [Section; 5] = [
        Section::Explanation,
        Section::RootCauses,
        Section::RemediationSteps,
        Section::PreventionStrategies,
        Section::Confidence,
    ];

    fn label(&self) -> &'static str {
        match self {
            Section::Explanation => "Explanation",
            Section::RootCauses => "Root Causes",
            Section::RemediationSteps => "Remediation Steps",
            Section::PreventionStrategies => "Prevention Strategies",
            Section::Confidence => "Confidence",
        }
    }

    fn from_heading(heading: &str) -> Option<Self> {
        let h = heading.to_ascii_lowercase();
        if h.starts_with("explanation") {
            Some(Section::Explanation)
        } else if h.starts_with("root cause") {
            Some(Section::RootCauses)
        } else if h.starts_with("remediation step") {
            Some(Section::RemediationSteps)
        } else if h.starts_with("prevention strateg") {
            Some(Section::PreventionStrategies)
        } else if h.starts_with("confidence") {
            Some(Section::Confidence)
        } else {
            None
        }
    }
}

/// Structured view of an analysis response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAnalysis {
    pub explanation: String,
    pub root_causes: Vec<String>,
    pub remediation_steps: Vec<String>,
    pub prevention_strategies: Vec<String>,
    /// Clamped to [0, 1]; `None` when absent or unreadable
    pub confidence: Option<f64>,
    pub status: ParseStatus,
}

static HEADING_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BULLET_RE: OnceLock<Option<Regex>> = OnceLock::new();
static NUMBER_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn heading_re() -> Option<&'static Regex> {
    HEADING_RE
        .get_or_init(|| {
            Regex::new(
                r"(?im)^[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?(explanation|root[ \t]+causes?|remediation[ \t]+steps?|prevention[ \t]+strateg(?:y|ies)|confidence(?:[ \t]+score)?)(?:\*\*)?[ \t]*:(?:\*\*)?",
            )
            .ok()
        })
        .as_ref()
}

fn bullet_re() -> Option<&'static Regex> {
    BULLET_RE
        .get_or_init(|| Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+").ok())
        .as_ref()
}

fn number_re() -> Option<&'static Regex> {
    NUMBER_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(%)?").ok())
        .as_ref()
}

/// Split a section body into list items.
///
/// Bulleted or numbered lines become one item each; continuation lines are
/// joined onto the previous item. Unbulleted text is one item per line.
pub fn split_items(body: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    let mut saw_bullet = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let bullet = bullet_re().and_then(|re| re.find(line));
        match bullet {
            Some(m) => {
                saw_bullet = true;
                let text = line[m.end()..].trim();
                if !text.is_empty() {
                    items.push(text.to_string());
                }
            }
            None if saw_bullet => {
                if let Some(last) = items.last_mut() {
                    last.push(' ');
                    last.push_str(trimmed);
                }
            }
            None => items.push(trimmed.to_string()),
        }
    }
    items
}

/// Read a confidence value: `0.85`, `85%`, `85` or `high`/`medium`/`low`.
pub fn parse_confidence(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    if let Some(caps) = number_re().and_then(|re| re.captures(&lower)) {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let value = if caps.get(2).is_some() || value > 1.0 {
            value / 100.0
        } else {
            value
        };
        return Some(clamp_unit(value));
    }
    if lower.starts_with("very high") {
        Some(0.95)
    } else if lower.starts_with("high") {
        Some(0.85)
    } else if lower.starts_with("medium") || lower.starts_with("moderate") {
        Some(0.6)
    } else if lower.starts_with("very low") {
        Some(0.1)
    } else if lower.starts_with("low") {
        Some(0.3)
    } else {
        None
    }
}

/// Parse an analysis response into its sections.
pub fn parse_analysis(response: &str) -> ParsedAnalysis {
    let mut found: Vec<(Section, usize, usize)> = Vec::new();
    if let Some(re) = heading_re() {
        for caps in re.captures_iter(response) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(section) = Section::from_heading(name.as_str()) {
                found.push((section, whole.start(), whole.end()));
            }
        }
    }

    if found.is_empty() {
        return ParsedAnalysis {
            explanation: response.trim().to_string(),
            root_causes: Vec::new(),
            remediation_steps: Vec::new(),
            prevention_strategies: Vec::new(),
            confidence: None,
            status: ParseStatus::Unparsed,
        };
    }

    let mut parsed = ParsedAnalysis {
        explanation: String::new(),
        root_causes: Vec::new(),
        remediation_steps: Vec::new(),
        prevention_strategies: Vec::new(),
        confidence: None,
        status: ParseStatus::Complete,
    };
    let mut seen: Vec<Section> = Vec::new();

    for (i, (section, _, body_start)) in found.iter().enumerate() {
        let body_end = found.get(i + 1).map(|f| f.1).unwrap_or(response.len());
        let body = response[*body_start..body_end].trim();
        // First occurrence wins.
        if seen.contains(section) {
            continue;
        }
        seen.push(*section);

        match section {
            Section::Explanation => {
                parsed.explanation = body
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
            }
            Section::RootCauses => parsed.root_causes = split_items(body),
            Section::RemediationSteps => parsed.remediation_steps = split_items(body),
            Section::PreventionStrategies => parsed.prevention_strategies = split_items(body),
            Section::Confidence => parsed.confidence = parse_confidence(body),
        }
    }

    let missing: Vec<String> = Section::ALL
        .iter()
        .filter(|s| {
            !seen.contains(s) || (**s == Section::Confidence && parsed.confidence.is_none())
        })
        .map(|s| s.label().to_string())
        .collect();

    if !missing.is_empty() {
        parsed.status = ParseStatus::Partial { missing };
    }
    parsed
}
