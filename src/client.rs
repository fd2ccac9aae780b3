use std::sync::Arc;

use chrono::Utc;

use crate::{
    admin,
    catalog::{Flag, NewFlag, NewRule, Rule, RuleId},
    eval, ClientConfig, Context, Error, EvaluationEvent, EvaluationResult, FlagStore, Result,
};

/// Entry point for evaluating and administering feature flags.
///
/// Admin operations return errors to the caller unchanged. Evaluation never fails: any error
/// (missing flag, broken rule, storage failure) degrades to a disabled [`EvaluationResult`]
/// whose reason carries the error message.
///
/// # Examples
/// ```
/// # use switchboard::{ClientConfig, NewFlag, NewRule};
/// let client = ClientConfig::in_memory().to_client();
/// client
///     .create_flag(
///         NewFlag::new("new-checkout", "New checkout")
///             .enabled(true)
///             .variation("control", "v1")
///             .variation("treatment", "v2"),
///     )
///     .unwrap();
/// client
///     .create_rule("new-checkout", NewRule::new("plan", "equals", "premium", 1))
///     .unwrap();
///
/// let result = client.evaluate_simple("new-checkout", "plan", "premium");
/// assert_eq!(result.variation_name.as_deref(), Some("treatment"));
/// ```
pub struct Client<'a> {
    config: ClientConfig<'a>,
}

impl<'a> Client<'a> {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig<'a>) -> Self {
        Client { config }
    }

    /// Storage backend used by this client.
    pub fn store(&self) -> &Arc<dyn FlagStore> {
        &self.config.store
    }

    /// List all flags, ordered by key.
    pub fn list_flags(&self) -> Result<Vec<Flag>> {
        admin::list_flags(&*self.config.store)
    }

    /// Get a single flag.
    pub fn get_flag(&self, flag_key: &str) -> Result<Flag> {
        admin::get_flag(&*self.config.store, flag_key)
    }

    /// Create a flag. Fails with [`Error::FlagAlreadyExists`] if the key is taken.
    pub fn create_flag(&self, new_flag: NewFlag) -> Result<Flag> {
        admin::create_flag(&*self.config.store, new_flag)
    }

    /// Append a targeting rule to a flag.
    pub fn create_rule(&self, flag_key: &str, new_rule: NewRule) -> Result<Rule> {
        admin::create_rule(&*self.config.store, flag_key, new_rule)
    }

    /// Turn a flag on or off.
    pub fn toggle_flag(&self, flag_key: &str, enabled: bool) -> Result<()> {
        admin::toggle_flag(&*self.config.store, flag_key, enabled)
    }

    /// Delete a rule. `rule_id` is the rule id in its string form; an id that does not parse
    /// cannot name any rule and is reported as [`Error::RuleNotFound`].
    pub fn delete_rule(&self, flag_key: &str, rule_id: &str) -> Result<()> {
        let id: RuleId = rule_id
            .parse()
            .map_err(|_| Error::rule_not_found(flag_key, rule_id))?;
        admin::delete_rule(&*self.config.store, flag_key, id)
    }

    /// Delete a flag with all its variations and rules.
    pub fn delete_flag(&self, flag_key: &str) -> Result<()> {
        admin::delete_flag(&*self.config.store, flag_key)
    }

    /// Evaluate a flag for `context`.
    pub fn evaluate(&self, flag_key: &str, context: &Context) -> EvaluationResult {
        let result = eval::evaluate(&*self.config.store, flag_key, context);
        self.finish(flag_key, context, result)
    }

    /// Evaluate a flag considering only rules on `attribute`.
    pub fn evaluate_simple(&self, flag_key: &str, attribute: &str, value: &str) -> EvaluationResult {
        let result = eval::evaluate_simple(&*self.config.store, flag_key, attribute, value);
        let context = Context::from([(attribute.to_owned(), value.to_owned())]);
        self.finish(flag_key, &context, result)
    }

    /// Whether the flag is on for `context`. Errors count as off.
    pub fn is_enabled(&self, flag_key: &str, context: &Context) -> bool {
        self.evaluate(flag_key, context).enabled
    }

    fn finish(
        &self,
        flag_key: &str,
        context: &Context,
        result: Result<EvaluationResult>,
    ) -> EvaluationResult {
        match result {
            Ok(result) => {
                log::trace!(target: "switchboard",
                            flag_key,
                            context:serde = context,
                            result:serde = result;
                            "evaluated a flag");

                self.config.evaluation_logger.log_evaluation(EvaluationEvent {
                    flag_key: result.flag_key.clone(),
                    enabled: result.enabled,
                    variation: result.variation_name.clone(),
                    reason: result.reason.to_string(),
                    matched_rule_id: result.matched_rule_id,
                    context: context.clone(),
                    timestamp: Utc::now(),
                });
                result
            }
            Err(err) => {
                log::warn!(target: "switchboard",
                           flag_key,
                           context:serde = context;
                           "error occurred while evaluating a flag: {err}");
                EvaluationResult::from_error(flag_key, &err)
            }
        }
    }
}
