//! Scoring engine
//!
//! Pure function from (campaign rule set, lead answers) to a score and
//! quality tier. Referentially transparent: no clocks, no randomness, no
//! side effects, so leads can be re-scored and replayed safely.
//!
//! Evaluation order:
//! 1. Resolve conditional question visibility; hidden questions contribute
//!    no score and their answers are excluded from rule evaluation.
//! 2. Evaluate rules in declared order. First matching rule wins for the
//!    quality tier; score accumulation follows the rule set's policy and an
//!    exclusive matching rule stops further evaluation.
//! 3. Clamp to 0..=100 and fall back to score banding when no rule set the
//!    tier.

use std::collections::HashMap;

use leadpipe_core::{
    AccumulationPolicy, AnswerValue, Answers, Campaign, Error, LeadQuality, Predicate,
    PredicateOp, Result, ScoringRule,
};

pub mod predicate;

pub use predicate::evaluate_predicate;

/// Result of scoring one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreOutcome {
    /// 0..=100
    pub score: u8,
    pub quality: LeadQuality,
}

/// Validate that every visible required question has an answer.
///
/// Only visible questions count: a required question hidden by its
/// visibility rule may be legitimately unanswered.
pub fn validate_required(campaign: &Campaign, answers: &Answers) -> Result<()> {
    let visible = resolve_visibility(campaign, answers)?;
    for question in &campaign.questions {
        if question.required
            && visible.contains_key(question.id.as_str())
            && !answers.contains_key(&question.id)
        {
            return Err(Error::MissingAnswer(question.id.clone()));
        }
    }
    Ok(())
}

/// Evaluate the campaign's rule set against the lead's answers.
pub fn score(campaign: &Campaign, answers: &Answers) -> Result<ScoreOutcome> {
    validate_rules(campaign)?;
    let visible_answers = resolve_visibility(campaign, answers)?;

    let mut total: i64 = 0;
    let mut scored_once = false;
    let mut quality: Option<LeadQuality> = None;

    for rule in &campaign.scoring.rules {
        if !evaluate_predicate(&rule.condition, &visible_answers)? {
            continue;
        }

        if let Some(points) = rule.score {
            let take = match campaign.scoring.accumulation {
                AccumulationPolicy::Additive => true,
                AccumulationPolicy::FirstMatch => !scored_once,
            };
            if take {
                total += i64::from(points);
                scored_once = true;
            }
        }

        if quality.is_none() {
            quality = rule.quality;
        }

        if rule.exclusive {
            break;
        }
    }

    let score = total.clamp(0, 100) as u8;
    Ok(ScoreOutcome {
        score,
        quality: quality.unwrap_or_else(|| LeadQuality::from_score(score)),
    })
}

/// Resolve conditional question visibility and return only the answers of
/// visible questions. Answers with no matching question are dropped as well,
/// so rules can never match on stray input.
fn resolve_visibility<'a>(
    campaign: &Campaign,
    answers: &'a Answers,
) -> Result<HashMap<&'a str, &'a AnswerValue>> {
    let mut visible: HashMap<&str, &AnswerValue> = HashMap::new();

    // Questions are declared in display order, so a visibility predicate
    // only ever reads answers that were already resolved.
    for question in &campaign.questions {
        let shown = match &question.visible_if {
            None => true,
            Some(rule) => evaluate_predicate(&rule.predicate, &visible)?,
        };
        if shown {
            if let Some((key, value)) = answers.get_key_value(&question.id) {
                visible.insert(key.as_str(), value);
            }
        }
    }

    Ok(visible)
}

/// Fail fast on malformed rules before any evaluation runs.
fn validate_rules(campaign: &Campaign) -> Result<()> {
    for (index, rule) in campaign.scoring.rules.iter().enumerate() {
        validate_rule(campaign, index, rule)?;
    }
    for question in &campaign.questions {
        if let Some(rule) = &question.visible_if {
            if campaign.question(&rule.predicate.question).is_none() {
                return Err(Error::ScoringRule(format!(
                    "Visibility rule on '{}' references unknown question '{}'",
                    question.id, rule.predicate.question
                )));
            }
        }
    }
    Ok(())
}

fn validate_rule(campaign: &Campaign, index: usize, rule: &ScoringRule) -> Result<()> {
    let condition = &rule.condition;
    if campaign.question(&condition.question).is_none() {
        return Err(Error::ScoringRule(format!(
            "Rule {} references unknown question '{}'",
            index, condition.question
        )));
    }
    if rule.score.is_none() && rule.quality.is_none() {
        return Err(Error::ScoringRule(format!(
            "Rule {} has no consequence (neither score nor quality)",
            index
        )));
    }
    match condition.op {
        PredicateOp::In => {
            if !matches!(condition.value, AnswerValue::List(_)) {
                return Err(Error::ScoringRule(format!(
                    "Rule {}: 'in' condition requires a list value",
                    index
                )));
            }
        }
        PredicateOp::Gt | PredicateOp::Gte | PredicateOp::Lt | PredicateOp::Lte => {
            if !matches!(condition.value, AnswerValue::Number(_)) {
                return Err(Error::ScoringRule(format!(
                    "Rule {}: numeric comparison requires a number value",
                    index
                )));
            }
        }
        PredicateOp::Eq | PredicateOp::Ne => {}
    }
    Ok(())
}
