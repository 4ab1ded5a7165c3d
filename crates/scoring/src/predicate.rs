//! Predicate evaluation against resolved answers.

use std::collections::HashMap;

use leadpipe_core::{AnswerValue, Error, Predicate, PredicateOp, Result};

/// Evaluate one predicate against the visible answers.
///
/// A missing answer never matches (including `Ne`): an unanswered question
/// expresses nothing about the lead. Type mismatches in the *answer* are a
/// non-match; type mismatches in the rule itself are caught up front by rule
/// validation.
pub fn evaluate_predicate(
    predicate: &Predicate,
    answers: &HashMap<&str, &AnswerValue>,
) -> Result<bool> {
    let answer = match answers.get(predicate.question.as_str()) {
        Some(value) => *value,
        None => return Ok(false),
    };

    let matched = match predicate.op {
        PredicateOp::Eq => answer == &predicate.value,
        PredicateOp::Ne => answer != &predicate.value,
        PredicateOp::In => {
            let AnswerValue::List(allowed) = &predicate.value else {
                return Err(Error::ScoringRule(format!(
                    "'in' condition on '{}' requires a list value",
                    predicate.question
                )));
            };
            match answer {
                AnswerValue::Text(s) => allowed.contains(s),
                AnswerValue::List(items) => items.iter().any(|i| allowed.contains(i)),
                other => allowed.contains(&other.render()),
            }
        }
        PredicateOp::Gt | PredicateOp::Gte | PredicateOp::Lt | PredicateOp::Lte => {
            let Some(rhs) = predicate.value.as_number() else {
                return Err(Error::ScoringRule(format!(
                    "Numeric comparison on '{}' requires a number value",
                    predicate.question
                )));
            };
            match answer.as_number() {
                Some(lhs) => match predicate.op {
                    PredicateOp::Gt => lhs > rhs,
                    PredicateOp::Gte => lhs >= rhs,
                    PredicateOp::Lt => lhs < rhs,
                    PredicateOp::Lte => lhs <= rhs,
                    _ => unreachable!(),
                },
                // Non-numeric answer to a numeric comparison: no match
                None => false,
            }
        }
    };

    Ok(matched)
}
