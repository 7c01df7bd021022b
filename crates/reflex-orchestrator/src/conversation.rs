//! Append-only conversation history re-sent to the generator on every attempt.

use serde::{Deserialize, Serialize};

use crate::solution::Solution;

/// Prefix of a diagnostic notice that carries web search results.
pub const SEARCH_RESULTS_PREFIX: &str = "Web search results:";

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationTurn {
    /// The coding question that started the run.
    UserQuestion {
        /// The question text.
        content: String,
    },
    /// A candidate solution returned by the generator.
    AssistantSolution {
        /// The solution rendered as prose.
        content: String,
        /// The structured solution the content was rendered from.
        solution: Solution,
    },
    /// A synthesized message describing a failed validation (or carrying
    /// search context) that prompts the next attempt.
    DiagnosticNotice {
        /// The notice text.
        content: String,
    },
}

/// Who a turn is attributed to when sent to a chat model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Written on the user's side of the conversation.
    User,
    /// Written by the model.
    Assistant,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl ConversationTurn {
    /// Creates a `UserQuestion` turn.
    #[must_use]
    pub fn question(content: impl Into<String>) -> Self {
        Self::UserQuestion {
            content: content.into(),
        }
    }

    /// Creates an `AssistantSolution` turn, rendering the solution as prose.
    #[must_use]
    pub fn solution(solution: Solution) -> Self {
        Self::AssistantSolution {
            content: solution.as_attempt_message(),
            solution,
        }
    }

    /// Creates a `DiagnosticNotice` turn.
    #[must_use]
    pub fn notice(content: impl Into<String>) -> Self {
        Self::DiagnosticNotice {
            content: content.into(),
        }
    }

    /// Returns the free-text content of the turn.
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::UserQuestion { content }
            | Self::AssistantSolution { content, .. }
            | Self::DiagnosticNotice { content } => content,
        }
    }

    /// Returns the chat role this turn is sent as.
    ///
    /// Diagnostic notices are sent on the user's side so the model treats
    /// them as feedback on its previous attempt.
    #[must_use]
    pub const fn role(&self) -> TurnRole {
        match self {
            Self::UserQuestion { .. } | Self::DiagnosticNotice { .. } => TurnRole::User,
            Self::AssistantSolution { .. } => TurnRole::Assistant,
        }
    }

    /// Returns `true` for a notice carrying web search results.
    #[must_use]
    pub fn is_search_context(&self) -> bool {
        match self {
            Self::DiagnosticNotice { content } => content.starts_with(SEARCH_RESULTS_PREFIX),
            Self::UserQuestion { .. } | Self::AssistantSolution { .. } => false,
        }
    }
}

/// Ordered, append-only sequence of [`ConversationTurn`]s.
///
/// Turns can be appended and read, never removed or edited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    /// Creates a log seeded with the user's question.
    #[must_use]
    pub fn with_question(question: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::question(question)],
        }
    }

    /// Appends a turn to the end of the log.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Returns all turns in insertion order.
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Returns the number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if the log has no turns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the most recent turn.
    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Returns the text of the first user question, if any.
    #[must_use]
    pub fn question(&self) -> Option<&str> {
        self.turns.iter().find_map(|turn| match turn {
            ConversationTurn::UserQuestion { content } => Some(content.as_str()),
            ConversationTurn::AssistantSolution { .. }
            | ConversationTurn::DiagnosticNotice { .. } => None,
        })
    }

    /// Returns `true` if `earlier` is a prefix of this log.
    ///
    /// Holds for any two snapshots of the same run taken in order.
    #[must_use]
    pub fn extends(&self, earlier: &Self) -> bool {
        self.turns.len() >= earlier.turns.len()
            && self.turns[..earlier.turns.len()] == earlier.turns[..]
    }
}
