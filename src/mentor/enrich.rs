//! Derive suggestions, next steps and metadata from a finished response.

use chrono::Utc;
use itertools::Itertools;
use serde_json::{json, Map, Value};

use super::LearningMode;
use crate::model::{FinishReason, Usage};
use crate::relay::StreamVariant;

const MAX_SUGGESTIONS: usize = 5;
const MAX_CONCEPTS: usize = 5;

const PRO_TIP_MARKERS: &[&str] = &["pro tip:", "advanced tip:"];
const CONCEPT_MARKERS: &[&str] = &["concept:", "key idea:", "important:", "💡"];
const ACTION_MARKERS: &[&str] = &["action:", "try this:", "practice:", "🎯", "➡️"];
const NEXT_STEP_MARKERS: &[&str] = &["next step:", "up next:", "next:", "🚀"];
const EXERCISE_MARKERS: &[&str] = &["exercise:", "challenge:", "practice problem:"];
const ENGAGEMENT_MARKERS: &[&str] = &["?", "!", "💡", "🎯", "🚀", "⚡", "🔥"];

/// What the upstream reported alongside the text.
#[derive(Debug, Clone, Default)]
pub struct TurnStats {
    pub model: String,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Enrichment attached to a completion frame and the stored mentor message.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub suggestions: Vec<String>,
    pub next_steps: Option<String>,
    pub concepts: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Extracted {
    concepts: Vec<String>,
    actions: Vec<String>,
    next_steps: Vec<String>,
    exercises: Vec<String>,
    pro_tips: Vec<String>,
}

/// Remove every marker from a line, matching ASCII case-insensitively.
fn strip_markers(line: &str, markers: &[&str]) -> String {
    let mut text = line.to_string();
    for marker in markers {
        while let Some(at) = text.to_ascii_lowercase().find(marker) {
            text.replace_range(at..at + marker.len(), "");
        }
    }
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '-' | '#' | '•'))
        .to_string()
}

fn extract(content: &str) -> Extracted {
    let mut found = Extracted::default();

    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_ascii_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        let (bucket, markers) = if has(PRO_TIP_MARKERS) {
            (&mut found.pro_tips, PRO_TIP_MARKERS)
        } else if has(EXERCISE_MARKERS) {
            (&mut found.exercises, EXERCISE_MARKERS)
        } else if has(CONCEPT_MARKERS) {
            (&mut found.concepts, CONCEPT_MARKERS)
        } else if has(ACTION_MARKERS) {
            (&mut found.actions, ACTION_MARKERS)
        } else if has(NEXT_STEP_MARKERS) {
            (&mut found.next_steps, NEXT_STEP_MARKERS)
        } else {
            continue;
        };

        let text = strip_markers(line, markers);
        if !text.is_empty() {
            bucket.push(text);
        }
    }

    found
}

fn default_actions(mode: LearningMode) -> &'static [&'static str] {
    match mode {
        LearningMode::Socratic => &[
            "🤔 Think deeper about this",
            "💭 Explore alternative perspectives",
            "🔍 Question your assumptions",
            "📝 Reflect on your reasoning",
        ],
        LearningMode::Debug => &[
            "🔧 Practice the corrected approach",
            "🧪 Test your understanding",
            "📋 Review common mistakes",
            "✅ Confirm the fix with an example",
        ],
        LearningMode::Challenge => &[
            "🎯 Try a harder variant",
            "⏱️ Solve it against the clock",
            "🧩 Combine it with another concept",
            "🏆 Explain the solution to someone else",
        ],
        LearningMode::Mentor => &[
            "💼 Apply this in a real project",
            "📚 Read how industry teams use it",
            "🤝 Discuss it with a peer",
            "🗺️ Add it to your learning roadmap",
        ],
        LearningMode::Adaptive => &[
            "🎯 Practice with examples",
            "🔍 Explore related concepts",
            "💡 Ask for clarification",
            "🚀 Try a challenge problem",
        ],
    }
}

fn default_next_step(mode: LearningMode) -> &'static str {
    match mode {
        LearningMode::Socratic => "Continue exploring through guided questions",
        LearningMode::Debug => "Practice the corrected concept with new examples",
        LearningMode::Challenge => "Attempt the next level of difficulty",
        LearningMode::Mentor => "Apply these insights to a real-world project",
        LearningMode::Adaptive => "Practice these concepts with guided exercises",
    }
}

/// Derive the completion enrichment from the full response text.
///
/// Lines tagged with markers such as `Concept:`, `Try this:` or `Next step:`
/// are lifted out of the text. When the response carries none, the mode's
/// default actions and next step are used.
pub fn enrich(
    content: &str,
    mode: LearningMode,
    variant: StreamVariant,
    stats: &TurnStats,
) -> Enrichment {
    let mut found = extract(content);
    found.concepts.truncate(MAX_CONCEPTS);

    let suggestions: Vec<String> = if found.actions.is_empty() {
        default_actions(mode).iter().map(|s| s.to_string()).collect()
    } else {
        found
            .actions
            .iter()
            .unique()
            .take(MAX_SUGGESTIONS)
            .cloned()
            .collect()
    };

    let next_steps = if found.next_steps.is_empty() {
        default_next_step(mode).to_string()
    } else {
        found.next_steps.iter().join(" ")
    };

    let complexity = found.concepts.len() + found.exercises.len() + found.pro_tips.len();
    let engagement: usize = ENGAGEMENT_MARKERS
        .iter()
        .map(|m| content.matches(m).count())
        .sum();

    let mut metadata = Map::new();
    metadata.insert("model_used".into(), json!(stats.model));
    metadata.insert("mode".into(), json!(mode.as_str()));
    metadata.insert("response_length".into(), json!(content.chars().count()));
    metadata.insert("concepts_covered".into(), json!(found.concepts));
    metadata.insert("complexity_score".into(), json!(complexity));
    metadata.insert("engagement_score".into(), json!(engagement));
    metadata.insert("exercises_count".into(), json!(found.exercises.len()));
    metadata.insert("pro_tips_count".into(), json!(found.pro_tips.len()));
    metadata.insert("premium_features".into(), json!(variant == StreamVariant::Premium));
    metadata.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
    if let Some(reason) = &stats.finish_reason {
        metadata.insert("finish_reason".into(), json!(reason.as_str()));
    }
    if let Some(tokens) = stats.usage.prompt_tokens {
        metadata.insert("prompt_tokens".into(), json!(tokens));
    }
    if let Some(tokens) = stats.usage.completion_tokens {
        metadata.insert("completion_tokens".into(), json!(tokens));
    }

    Enrichment {
        suggestions,
        next_steps: Some(next_steps),
        concepts: found.concepts,
        metadata,
    }
}
