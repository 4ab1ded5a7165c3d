//! Campaign configuration types
//!
//! A campaign is immutable-per-version: an ordered question list, a scoring
//! rule set and a prompt template referencing answer placeholders. The
//! pipeline reads campaigns read-only; ownership stays with the surrounding
//! framework.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::lead::LeadQuality;
use crate::CampaignId;

/// Mapping of question id to the submitted answer value.
pub type Answers = HashMap<String, AnswerValue>;

/// One submitted answer. Untagged so plain JSON submissions deserialize
/// directly ("business", 42, true, ["a", "b"]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AnswerValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the answer for prompt-template substitution.
    pub fn render(&self) -> String {
        match self {
            AnswerValue::Bool(b) => b.to_string(),
            AnswerValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::List(items) => items.join(", "),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        AnswerValue::Text(s.to_string())
    }
}

impl From<f64> for AnswerValue {
    fn from(n: f64) -> Self {
        AnswerValue::Number(n)
    }
}

/// Comparison operator for rule conditions and visibility predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Ne,
    /// Answer is a member of the predicate's list value
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A single condition against one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// Question id the condition reads
    pub question: String,
    pub op: PredicateOp,
    /// Right-hand side; for `In` this must be a list
    pub value: AnswerValue,
}

/// Conditional-display rule: the question only applies when the predicate
/// matches an earlier answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityRule {
    pub predicate: Predicate,
}

/// Question type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    Number,
    SingleChoice,
    MultiChoice,
    Boolean,
}

/// One campaign question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub kind: QuestionKind,
    /// Allowed options for choice questions
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// When set, the question is hidden unless the predicate matches
    #[serde(default)]
    pub visible_if: Option<VisibilityRule>,
}

/// How scores from multiple matching rules combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationPolicy {
    /// Scores from all matching rules sum (clamped to 0..=100)
    #[default]
    Additive,
    /// Only the first matching rule contributes a score
    FirstMatch,
}

/// One conditional scoring rule: a condition plus a consequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRule {
    pub condition: Predicate,
    /// Score contribution when the condition matches
    #[serde(default)]
    pub score: Option<i32>,
    /// Quality tier set when the condition matches (first match wins)
    #[serde(default)]
    pub quality: Option<LeadQuality>,
    /// An exclusive matching rule stops further score accumulation
    #[serde(default)]
    pub exclusive: bool,
}

/// Ordered rule set evaluated against a lead's answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringRuleSet {
    pub rules: Vec<ScoringRule>,
    #[serde(default)]
    pub accumulation: AccumulationPolicy,
}

/// Immutable-per-version campaign configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub slug: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub scoring: ScoringRuleSet,
    /// Template with `{{question_id}}` placeholders substituted from answers
    pub prompt_template: String,
}

impl Campaign {
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Substitute `{{question_id}}` placeholders with rendered answers.
    /// Unanswered placeholders render as an empty string.
    pub fn render_prompt(&self, answers: &Answers) -> String {
        let mut out = self.prompt_template.clone();
        for question in &self.questions {
            let placeholder = format!("{{{{{}}}}}", question.id);
            if out.contains(&placeholder) {
                let value = answers
                    .get(&question.id)
                    .map(|a| a.render())
                    .unwrap_or_default();
                out = out.replace(&placeholder, &value);
            }
        }
        out
    }
}
