//! Catalog mutations.
//!
//! Every operation runs as a single store transaction: validation happens against the
//! transaction's view of the catalog, and the flag aggregate is rewritten as a whole, so a
//! concurrent reader sees either the old or the new flag, never a mix.
use chrono::Utc;

use crate::{
    catalog::{Flag, NewFlag, NewRule, Operator, Rule, RuleId, Variation},
    store::{atomically, FlagStore},
    Error, Result,
};

/// Create a flag with its variations. Variations are indexed `0..n` in the order given, and the
/// default variation is the first one.
pub fn create_flag(store: &dyn FlagStore, new_flag: NewFlag) -> Result<Flag> {
    if new_flag.key.trim().is_empty() {
        return Err(Error::Validation("flag key must not be empty".to_owned()));
    }
    if new_flag.name.trim().is_empty() {
        return Err(Error::Validation("flag name must not be empty".to_owned()));
    }

    let flag = atomically(store, |tx| {
        if tx.contains(&new_flag.key) {
            return Err(Error::FlagAlreadyExists(new_flag.key.clone()));
        }

        let now = Utc::now();
        let variations: Vec<Variation> = new_flag
            .variations
            .into_iter()
            .zip(0..)
            .map(|(variation, index)| Variation {
                index,
                name: variation.name,
                value: variation.value,
            })
            .collect();

        let flag = Flag {
            default_variation_index: (!variations.is_empty()).then_some(0),
            key: new_flag.key,
            name: new_flag.name,
            description: new_flag.description,
            enabled: new_flag.enabled,
            variations,
            rules: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        tx.put(flag.clone());
        Ok(flag)
    })?;

    log::debug!(target: "switchboard",
                flag_key:display = flag.key,
                enabled = flag.enabled,
                variations = flag.variations.len();
                "created flag");
    Ok(flag)
}

/// Append a targeting rule to a flag. The rule gets the lowest priority: its `order` is the
/// flag's current rule count.
pub fn create_rule(store: &dyn FlagStore, flag_key: &str, new_rule: NewRule) -> Result<Rule> {
    let rule = atomically(store, |tx| {
        let flag = tx
            .get(flag_key)
            .ok_or_else(|| Error::FlagNotFound(flag_key.to_owned()))?;

        if new_rule.attribute.trim().is_empty() {
            return Err(Error::Validation("rule attribute must not be empty".to_owned()));
        }
        if new_rule.operator.as_str().trim().is_empty() {
            return Err(Error::Validation("rule operator must not be empty".to_owned()));
        }
        if flag.variation(new_rule.variation_index).is_none() {
            return Err(Error::InvalidVariationIndex {
                flag_key: flag_key.to_owned(),
                index: new_rule.variation_index,
                count: flag.variations.len(),
            });
        }

        let now = Utc::now();
        let rule = Rule {
            id: tx.next_rule_id()?,
            attribute: new_rule.attribute,
            operator: new_rule.operator,
            value: new_rule.value,
            variation_index: new_rule.variation_index,
            order: u32::try_from(flag.rules.len())
                .map_err(|_| Error::Validation("too many rules".to_owned()))?,
            created_at: now,
        };

        let mut flag = (*flag).clone();
        flag.rules.push(rule.clone());
        flag.updated_at = now;
        tx.put(flag);
        Ok(rule)
    })?;

    if let Operator::Unknown(operator) = &rule.operator {
        log::warn!(target: "switchboard",
                   flag_key,
                   rule_id:display = rule.id,
                   operator:display = operator;
                   "rule uses an unknown operator and will never match");
    }
    log::debug!(target: "switchboard",
                flag_key,
                rule_id:display = rule.id,
                order = rule.order;
                "created rule");
    Ok(rule)
}

/// Set the flag's `enabled` state. Setting the current state again is a no-op.
pub fn toggle_flag(store: &dyn FlagStore, flag_key: &str, enabled: bool) -> Result<()> {
    atomically(store, |tx| {
        let flag = tx
            .get(flag_key)
            .ok_or_else(|| Error::FlagNotFound(flag_key.to_owned()))?;
        if flag.enabled == enabled {
            return Ok(());
        }

        let mut flag = (*flag).clone();
        flag.enabled = enabled;
        flag.updated_at = Utc::now();
        tx.put(flag);
        Ok(())
    })?;

    log::debug!(target: "switchboard", flag_key, enabled; "toggled flag");
    Ok(())
}

/// Remove a rule from a flag. Remaining rules keep their `order`.
///
/// Fails with [`Error::RuleNotFound`] if the flag has no rule with that id, including when the
/// rule belongs to a different flag.
pub fn delete_rule(store: &dyn FlagStore, flag_key: &str, rule_id: RuleId) -> Result<()> {
    atomically(store, |tx| {
        let flag = tx
            .get(flag_key)
            .ok_or_else(|| Error::FlagNotFound(flag_key.to_owned()))?;
        if flag.rule(rule_id).is_none() {
            return Err(Error::rule_not_found(flag_key, rule_id));
        }

        let mut flag = (*flag).clone();
        flag.rules.retain(|rule| rule.id != rule_id);
        flag.updated_at = Utc::now();
        tx.put(flag);
        Ok(())
    })?;

    log::debug!(target: "switchboard", flag_key, rule_id:display = rule_id; "deleted rule");
    Ok(())
}

/// Delete a flag together with all its variations and rules.
pub fn delete_flag(store: &dyn FlagStore, flag_key: &str) -> Result<()> {
    atomically(store, |tx| {
        if tx.remove(flag_key) {
            Ok(())
        } else {
            Err(Error::FlagNotFound(flag_key.to_owned()))
        }
    })?;

    log::debug!(target: "switchboard", flag_key; "deleted flag");
    Ok(())
}

/// Get a flag with variations sorted by index and rules by priority.
pub fn get_flag(store: &dyn FlagStore, flag_key: &str) -> Result<Flag> {
    store
        .get(flag_key)?
        .map(|flag| flag.to_sorted())
        .ok_or_else(|| Error::FlagNotFound(flag_key.to_owned()))
}

/// List all flags ordered by key, each sorted as in [`get_flag`].
pub fn list_flags(store: &dyn FlagStore) -> Result<Vec<Flag>> {
    Ok(store
        .list()?
        .iter()
        .map(|flag| flag.to_sorted())
        .collect())
}
