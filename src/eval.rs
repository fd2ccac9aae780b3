use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Serialize, Serializer};

use crate::{
    catalog::{Flag, Rule, RuleId, Variation},
    store::FlagStore,
    Error, EvaluationError, Result,
};

/// Caller-supplied attributes describing the current request or user.
pub type Context = HashMap<String, String>;

/// Outcome of evaluating a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// Whether the flag is on for this context.
    pub enabled: bool,
    /// Name of the served variation. `None` if the flag has no variations or evaluation failed.
    pub variation_name: Option<String>,
    /// Payload of the served variation.
    pub variation_value: Option<String>,
    /// Why this outcome was chosen.
    pub reason: Reason,
    /// Rule that selected the variation, if any.
    pub matched_rule_id: Option<RuleId>,
}

/// Reason code of an [`EvaluationResult`].
///
/// Serialized as `"flag_disabled"`, `"rule_match"`, `"default_variation"`, or
/// `"error: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The flag is globally off.
    FlagDisabled,
    /// A targeting rule matched.
    RuleMatch,
    /// No rule matched; the default variation is served.
    DefaultVariation,
    /// Evaluation failed and was degraded to a disabled result.
    Error(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::FlagDisabled => f.write_str("flag_disabled"),
            Reason::RuleMatch => f.write_str("rule_match"),
            Reason::DefaultVariation => f.write_str("default_variation"),
            Reason::Error(message) => write!(f, "error: {message}"),
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl EvaluationResult {
    fn new(flag_key: &str, enabled: bool, reason: Reason, variation: Option<&Variation>) -> Self {
        EvaluationResult {
            flag_key: flag_key.to_owned(),
            enabled,
            variation_name: variation.map(|v| v.name.clone()),
            variation_value: variation.map(|v| v.value.clone()),
            reason,
            matched_rule_id: None,
        }
    }

    /// Disabled result carrying `error` in its reason.
    pub fn from_error(flag_key: &str, error: &Error) -> Self {
        EvaluationResult::new(flag_key, false, Reason::Error(error.to_string()), None)
    }
}

impl Flag {
    /// Evaluate the flag for `context`.
    ///
    /// Disabled flags serve the default variation with `enabled == false`. Otherwise, rules are
    /// tried in priority order and the first one whose attribute is present in the context and
    /// matches selects the variation; if none does, the default variation is served.
    pub fn evaluate(
        &self,
        context: &Context,
    ) -> std::result::Result<EvaluationResult, EvaluationError> {
        self.evaluate_with(|rule| context.get(&rule.attribute).map(String::as_str))
    }

    /// Evaluate the flag considering only rules on `attribute`, as if the context held just
    /// `attribute = value`. Agrees with [`Flag::evaluate`] for such a context.
    pub fn evaluate_attribute(
        &self,
        attribute: &str,
        value: &str,
    ) -> std::result::Result<EvaluationResult, EvaluationError> {
        self.evaluate_with(|rule| (rule.attribute == attribute).then_some(value))
    }

    /// Shared evaluation. `lookup` returns the context value a rule should be tested against, or
    /// `None` if the context has no value for the rule's attribute.
    fn evaluate_with<'c>(
        &self,
        lookup: impl Fn(&Rule) -> Option<&'c str>,
    ) -> std::result::Result<EvaluationResult, EvaluationError> {
        if !self.enabled {
            return Ok(EvaluationResult::new(
                &self.key,
                false,
                Reason::FlagDisabled,
                self.default_variation(),
            ));
        }

        for rule in self.rules_by_priority() {
            let Some(value) = lookup(rule) else {
                continue;
            };
            if !rule.eval_value(value)? {
                continue;
            }

            let Some(variation) = self.variation(rule.variation_index) else {
                log::warn!(target: "switchboard",
                           flag_key:display = self.key,
                           rule_id:display = rule.id,
                           variation_index = rule.variation_index;
                           "internal: rule references a missing variation, skipping");
                continue;
            };

            let mut result =
                EvaluationResult::new(&self.key, true, Reason::RuleMatch, Some(variation));
            result.matched_rule_id = Some(rule.id);
            return Ok(result);
        }

        Ok(EvaluationResult::new(
            &self.key,
            true,
            Reason::DefaultVariation,
            self.default_variation(),
        ))
    }
}

/// Load `flag_key` from `store` and evaluate it for `context`.
///
/// Unlike [`Client::evaluate`](crate::Client::evaluate), errors are returned to the caller.
pub fn evaluate(
    store: &dyn FlagStore,
    flag_key: &str,
    context: &Context,
) -> Result<EvaluationResult> {
    let flag = load(store, flag_key)?;
    Ok(flag.evaluate(context)?)
}

/// Load `flag_key` from `store` and evaluate it considering only rules on `attribute`.
pub fn evaluate_simple(
    store: &dyn FlagStore,
    flag_key: &str,
    attribute: &str,
    value: &str,
) -> Result<EvaluationResult> {
    let flag = load(store, flag_key)?;
    Ok(flag.evaluate_attribute(attribute, value)?)
}

fn load(store: &dyn FlagStore, flag_key: &str) -> Result<Arc<Flag>> {
    store
        .get(flag_key)?
        .ok_or_else(|| Error::FlagNotFound(flag_key.to_owned()))
}
