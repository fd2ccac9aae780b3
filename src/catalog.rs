//! Flag catalog model.
//!
//! A [`Flag`] is the aggregate root: it owns its [`Variation`]s and [`Rule`]s, which have no
//! identity or lifecycle outside of it. Flags are always handed out as immutable snapshots
//! (`Arc<Flag>`) and replaced as a whole when mutated.
use std::{collections::HashSet, fmt, num::ParseIntError, str::FromStr};

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Stable rule identifier, unique across the catalog and assigned on creation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into,
)]
#[serde(transparent)]
pub struct RuleId(u64);

impl FromStr for RuleId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RuleId)
    }
}

/// A feature flag: the aggregate root of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    #[serde(default)]
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub default_variation_index: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One of the possible served outcomes of a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Variation {
    /// Stable reference target for rules and the default pointer. Not necessarily the position
    /// in [`Flag::variations`].
    pub index: u32,
    pub name: String,
    /// Opaque payload.
    pub value: String,
}

/// Targeting rule: if the context value of `attribute` satisfies `operator` against `value`,
/// serve the variation at `variation_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Rule {
    pub id: RuleId,
    pub attribute: String,
    pub operator: Operator,
    pub value: String,
    pub variation_index: u32,
    /// Evaluation priority, ascending. Ties are broken by creation order.
    pub order: u32,
    pub created_at: Timestamp,
}

/// Rule operator. Parsed case-insensitively; unrecognized names are kept verbatim and never
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[allow(missing_docs)]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    /// Full-string regular expression match.
    Matches,
    /// Comma-separated list membership.
    In,
    Unknown(String),
}

impl Operator {
    /// Canonical (lowercase) operator name, or the original text for unknown operators.
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::Contains => "contains",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Matches => "matches",
            Operator::In => "in",
            Operator::Unknown(name) => name,
        }
    }
}

impl From<&str> for Operator {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "equals" => Operator::Equals,
            "contains" => Operator::Contains,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "in" => Operator::In,
            _ => Operator::Unknown(value.to_owned()),
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        Operator::from(value.as_str())
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        match value {
            Operator::Unknown(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct NewFlag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    /// Variations in the order they should be indexed (0..n-1).
    #[serde(default)]
    pub variations: Vec<NewVariation>,
}

impl NewFlag {
    /// Start a disabled flag with no description and no variations.
    ///
    /// ```
    /// # use switchboard::NewFlag;
    /// let flag = NewFlag::new("new-checkout", "New checkout")
    ///     .enabled(true)
    ///     .variation("control", "v1")
    ///     .variation("treatment", "v2");
    /// assert_eq!(flag.variations.len(), 2);
    /// ```
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        NewFlag {
            key: key.into(),
            name: name.into(),
            ..NewFlag::default()
        }
    }

    #[allow(missing_docs)]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[allow(missing_docs)]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Append a variation. It gets the next free index.
    pub fn variation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variations.push(NewVariation {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NewVariation {
    pub name: String,
    pub value: String,
}

/// Input for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct NewRule {
    pub attribute: String,
    pub operator: Operator,
    pub value: String,
    pub variation_index: u32,
}

impl NewRule {
    #[allow(missing_docs)]
    pub fn new(
        attribute: impl Into<String>,
        operator: impl Into<Operator>,
        value: impl Into<String>,
        variation_index: u32,
    ) -> Self {
        NewRule {
            attribute: attribute.into(),
            operator: operator.into(),
            value: value.into(),
            variation_index,
        }
    }
}

impl Flag {
    /// Find variation by its stable `index`.
    pub fn variation(&self, index: u32) -> Option<&Variation> {
        self.variations.iter().find(|v| v.index == index)
    }

    /// Variation served when no rule applies: the one at `default_variation_index` if it
    /// resolves, otherwise the variation with the smallest index. `None` for flags without
    /// variations.
    pub fn default_variation(&self) -> Option<&Variation> {
        self.default_variation_index
            .and_then(|index| self.variation(index))
            .or_else(|| self.variations.iter().min_by_key(|v| v.index))
    }

    #[allow(missing_docs)]
    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    /// Rules in evaluation order: ascending `order`, ties broken by creation order.
    pub fn rules_by_priority(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.rules.iter().collect();
        // Rule ids are assigned monotonically, so they encode creation order.
        rules.sort_by_key(|rule| (rule.order, rule.id));
        rules
    }

    /// Copy of the flag with variations sorted by index and rules by priority, for stable
    /// external representation.
    pub fn to_sorted(&self) -> Flag {
        let mut flag = self.clone();
        flag.variations.sort_by_key(|v| v.index);
        flag.rules = self.rules_by_priority().into_iter().cloned().collect();
        flag
    }

    /// Check the aggregate's invariants: unique variation indices, every rule pointing at an
    /// existing variation, the default pointer resolving, and unique rule ids.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut indices = HashSet::new();
        for variation in &self.variations {
            if !indices.insert(variation.index) {
                return Err(format!(
                    "flag {}: duplicate variation index {}",
                    self.key, variation.index
                ));
            }
        }

        if let Some(index) = self.default_variation_index {
            if !indices.contains(&index) {
                return Err(format!(
                    "flag {}: default variation index {} does not resolve",
                    self.key, index
                ));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id) {
                return Err(format!("flag {}: duplicate rule id {}", self.key, rule.id));
            }
            if !indices.contains(&rule.variation_index) {
                return Err(format!(
                    "flag {}: rule {} references missing variation {}",
                    self.key, rule.id, rule.variation_index
                ));
            }
        }

        Ok(())
    }
}
