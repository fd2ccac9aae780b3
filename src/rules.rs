use regex::Regex;

use crate::{
    catalog::{Operator, Rule},
    Context, EvaluationError,
};

impl Rule {
    /// Evaluate the rule against `context`. A context without the rule's attribute does not
    /// match.
    pub fn eval(&self, context: &Context) -> Result<bool, EvaluationError> {
        match context.get(&self.attribute) {
            Some(value) => self.eval_value(value),
            None => Ok(false),
        }
    }

    /// Evaluate the rule against the value of its attribute.
    pub(crate) fn eval_value(&self, context_value: &str) -> Result<bool, EvaluationError> {
        self.operator
            .matches(&self.value, context_value)
            .map_err(|source| EvaluationError::InvalidRegex {
                rule_id: self.id,
                source,
            })
    }
}

impl Operator {
    /// Apply the operator. All comparisons are case-sensitive. Unknown operators never match.
    ///
    /// Fails only if the operator is [`Operator::Matches`] and `rule_value` is not a valid
    /// regular expression.
    pub fn matches(&self, rule_value: &str, context_value: &str) -> Result<bool, regex::Error> {
        Ok(match self {
            Self::Equals => context_value == rule_value,
            Self::Contains => context_value.contains(rule_value),
            Self::StartsWith => context_value.starts_with(rule_value),
            Self::EndsWith => context_value.ends_with(rule_value),
            Self::Matches => full_match_regex(rule_value)?.is_match(context_value),
            Self::In => rule_value
                .split(',')
                .any(|token| token.trim() == context_value),
            Self::Unknown(_) => false,
        })
    }
}

/// Compile `pattern` so that it must match the whole input.
fn full_match_regex(pattern: &str) -> Result<Regex, regex::Error> {
    // Compile the bare pattern first: a malformed pattern such as `a)|(b` would otherwise be
    // balanced by the anchoring group and silently change meaning.
    Regex::new(pattern)?;
    Regex::new(&format!("^(?:{pattern})$"))
}
