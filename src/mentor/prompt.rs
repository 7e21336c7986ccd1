//! System prompt construction.

use itertools::Itertools;

use super::{LearningMode, TurnContext};
use crate::client::StreamOptions;
use crate::relay::StreamVariant;
use crate::session::{ChatMessage, Session};

const BASE: &str = "You are MasterX, an AI learning mentor. Personalise explanations to the \
learner's goals and level, build from fundamentals to advanced ideas, use analogies and \
real-world examples, and keep the learner actively practising.";

const RESPONSE_SHAPE: &str = "Structure answers with short headers and bullet points. \
Mark key ideas with \"Concept:\", suggested follow-ups with \"Try this:\", exercises with \
\"Exercise:\", insider advice with \"Pro tip:\" and finish with a line starting \"Next step:\".";

const REASONING_HINT: &str = "Use step-by-step reasoning and give structured, educational \
responses with clear learning objectives.";

/// Observed mood of the recent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Confused,
    WantsChallenge,
    Engaged,
}

impl Mood {
    /// Look at the last three messages for signals about how the learner feels.
    pub fn from_history(history: &[ChatMessage]) -> Option<Self> {
        let start = history.len().saturating_sub(3);
        let recent = history[start..]
            .iter()
            .map(|m| m.message.to_lowercase())
            .join(" ");

        if recent.contains("confused") || recent.contains("don't understand") {
            Some(Mood::Confused)
        } else if recent.contains("boring") || recent.contains("slow") {
            Some(Mood::WantsChallenge)
        } else if recent.contains("excited") || recent.contains("love") {
            Some(Mood::Engaged)
        } else {
            None
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            Mood::Confused => "The learner seems confused: slow down, give clearer explanations and more examples.",
            Mood::WantsChallenge => "The learner wants more challenge: raise the difficulty and the pace.",
            Mood::Engaged => "The learner is engaged: keep the energy and introduce advanced concepts.",
        }
    }
}

fn mode_instructions(mode: LearningMode, context: &TurnContext) -> String {
    match mode {
        LearningMode::Adaptive => "Adapt to the learner: offer more than one way of explaining \
(visual, logical, practical), include real-world applications and propose follow-up \
exercises of increasing difficulty."
            .to_string(),
        LearningMode::Socratic => format!(
            "Socratic mode. Do not hand out the answer. Guide discovery with probing questions, \
build on the learner's replies, break questions down when they struggle and end with a \
question that leads to the next insight. Learning style: {}.",
            context.learning_style.as_deref().unwrap_or("adaptive")
        ),
        LearningMode::Debug => "Debug mode. Find the misconception behind the learner's \
question, name it explicitly, correct it with a minimal example and give a quick check \
to confirm the fix."
            .to_string(),
        LearningMode::Challenge => "Challenge mode. Pose a problem slightly above the learner's \
current level, offer hints on request rather than solutions, and describe how to make \
the problem harder once solved."
            .to_string(),
        LearningMode::Mentor => "Mentor mode. Answer as a senior practitioner: connect the topic \
to professional practice, industry trends and career growth, and suggest a concrete \
project to apply it."
            .to_string(),
    }
}

/// Build the system instructions for one turn.
pub fn system_prompt(
    mode: LearningMode,
    variant: StreamVariant,
    session: &Session,
    context: &TurnContext,
    history: &[ChatMessage],
) -> String {
    let objectives = if session.learning_objectives.is_empty() {
        "Exploratory learning".to_string()
    } else {
        session.learning_objectives.iter().join(", ")
    };

    let mut sections = vec![
        BASE.to_string(),
        mode_instructions(mode, context),
        format!(
            "Session context:\n- Subject: {}\n- Difficulty level: {}\n- Learning objectives: {}\n- Current topic: {}",
            session.subject.as_deref().unwrap_or("General learning"),
            session.difficulty_level,
            objectives,
            session
                .current_topic
                .as_deref()
                .unwrap_or("Introduction and foundations"),
        ),
    ];

    if let Some(background) = &context.user_background {
        sections.push(format!("Learner background: {}", background));
    }
    if !context.recent_topics.is_empty() {
        sections.push(format!(
            "Recent progress: {}",
            context.recent_topics.iter().join(", ")
        ));
    }
    if let Some(mood) = Mood::from_history(history) {
        sections.push(mood.hint().to_string());
    }
    if variant == StreamVariant::Premium {
        sections.push(format!("Active learning mode: {}.", mode));
    }

    sections.push(RESPONSE_SHAPE.to_string());
    sections.push(REASONING_HINT.to_string());
    sections.join("\n\n")
}

/// Generation knobs per mode.
pub fn stream_options(mode: LearningMode) -> StreamOptions {
    let temperature = match mode {
        LearningMode::Debug => 0.4,
        LearningMode::Challenge | LearningMode::Socratic => 0.6,
        LearningMode::Adaptive | LearningMode::Mentor => 0.7,
    };
    StreamOptions {
        temperature: Some(temperature),
        max_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NewSession, Sender};
    use chrono::Utc;
    use serde_json::Map;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: "m".into(),
            session_id: "s".into(),
            message: text.into(),
            sender: Sender::User,
            message_type: "text".into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_mood_uses_last_three_messages() {
        let history = vec![
            message("I'm so confused"),
            message("ok"),
            message("fine"),
            message("next"),
        ];
        assert_eq!(Mood::from_history(&history), None);
        assert_eq!(
            Mood::from_history(&history[..3]),
            Some(Mood::Confused)
        );
        assert_eq!(Mood::from_history(&[message("this is boring")]), Some(Mood::WantsChallenge));
        assert_eq!(Mood::from_history(&[]), None);
    }

    #[test]
    fn test_system_prompt_includes_context() {
        let session = Session::new(NewSession {
            user_id: "u".into(),
            subject: Some("Rust".into()),
            learning_objectives: vec!["ownership".into(), "lifetimes".into()],
            difficulty_level: "advanced".into(),
        });
        let context = TurnContext {
            user_background: Some("C++ developer".into()),
            recent_topics: vec!["borrowing".into()],
            ..Default::default()
        };

        let prompt = system_prompt(
            LearningMode::Debug,
            StreamVariant::Premium,
            &session,
            &context,
            &[message("I love this")],
        );

        assert!(prompt.contains("Subject: Rust"));
        assert!(prompt.contains("ownership, lifetimes"));
        assert!(prompt.contains("C++ developer"));
        assert!(prompt.contains("Recent progress: borrowing"));
        assert!(prompt.contains("Debug mode"));
        assert!(prompt.contains("Active learning mode: debug."));
        assert!(prompt.contains("The learner is engaged"));
    }

    #[test]
    fn test_standard_prompt_has_no_mode_banner() {
        let session = Session::new(NewSession {
            user_id: "u".into(),
            subject: None,
            learning_objectives: vec![],
            difficulty_level: "beginner".into(),
        });
        let prompt = system_prompt(
            LearningMode::Adaptive,
            StreamVariant::Standard,
            &session,
            &TurnContext::default(),
            &[],
        );
        assert!(prompt.contains("General learning"));
        assert!(prompt.contains("Exploratory learning"));
        assert!(!prompt.contains("Active learning mode"));
    }
}
