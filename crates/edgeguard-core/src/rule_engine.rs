//! Rule engine for selecting one action per inbound request.
//!
//! A [`RuleTable`] holds top-level rules and named rule groups. The
//! [`RuleEngine`] validates a table once at load time and then evaluates
//! requests against it.
//!
//! ## Evaluation Order
//!
//! 1. Rules are walked in ascending priority (lower number first)
//! 2. The first rule whose condition matches determines the action
//! 3. A delegating rule evaluates its group; the group's first matching
//!    sub-rule decides, with the rule's overrides replacing native actions
//! 4. A delegation whose group matches nothing falls through to the next rule
//! 5. The table's default action applies if nothing matches

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bot_control::{
    bot_control_group, BOT_CONTROL_GROUP, TGT_SIGNAL_AUTOMATED_BROWSER,
    TGT_SIGNAL_BROWSER_INCONSISTENCY, TGT_VOLUMETRIC_SESSION,
};
use crate::condition::{Condition, MatchOperator};
use crate::request::InboundRequest;

/// Name of the stock rule forcing a challenge on HTML navigations.
pub const FORCE_INTERSTITIAL_RULE: &str = "ForceInterstitial";

/// Name of the stock rule delegating API traffic to `bot-control`.
pub const TARGETED_BOT_CONTROL_RULE: &str = "TGTBotControl";

/// Errors raised while loading a rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The table is structurally invalid.
    #[error("malformed rule '{rule}': {reason}")]
    MalformedRule {
        /// Rule (or group) the problem was found in.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The table file could not be read.
    #[error("failed to read rule table: {0}")]
    Io(#[from] std::io::Error),

    /// The table file is not valid JSON for a rule table.
    #[error("failed to parse rule table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for rule loading.
pub type Result<T> = std::result::Result<T, RuleError>;

fn malformed(rule: &str, reason: impl Into<String>) -> RuleError {
    RuleError::MalformedRule {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

/// Terminal action produced by an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Let the request through.
    #[default]
    Allow,
    /// Require the client to complete a verification challenge.
    Challenge,
    /// Refuse the request.
    Block,
}

impl RuleAction {
    /// Returns a human-readable name for this action.
    pub fn name(&self) -> &'static str {
        match self {
            RuleAction::Allow => "Allow",
            RuleAction::Challenge => "Challenge",
            RuleAction::Block => "Block",
        }
    }
}

/// Action attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    /// Let the request through.
    Allow,
    /// Require a challenge.
    Challenge,
    /// Refuse the request.
    Block,
    /// Hand evaluation to a named rule group.
    Delegate {
        /// Group name.
        group: String,
        /// Sub-rule name to the action used in place of its native action.
        #[serde(default)]
        overrides: BTreeMap<String, RuleAction>,
    },
}

impl Action {
    /// Delegation without overrides.
    pub fn delegate(group: impl Into<String>) -> Self {
        Action::Delegate {
            group: group.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Returns the terminal action, or `None` for a delegation.
    pub fn terminal(&self) -> Option<RuleAction> {
        match self {
            Action::Allow => Some(RuleAction::Allow),
            Action::Challenge => Some(RuleAction::Challenge),
            Action::Block => Some(RuleAction::Block),
            Action::Delegate { .. } => None,
        }
    }
}

impl From<RuleAction> for Action {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::Allow => Action::Allow,
            RuleAction::Challenge => Action::Challenge,
            RuleAction::Block => Action::Block,
        }
    }
}

/// A prioritized rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name.
    pub name: String,
    /// Evaluation order key. Lower values are evaluated first.
    pub priority: u32,
    /// Condition the request must satisfy.
    pub statement: Condition,
    /// Action taken when the condition matches.
    pub action: Action,
}

impl Rule {
    /// Creates a rule.
    pub fn new(name: impl Into<String>, priority: u32, statement: Condition, action: Action) -> Self {
        Self {
            name: name.into(),
            priority,
            statement,
            action,
        }
    }
}

/// A named sub-classifier with its own ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    /// Group name referenced by delegating rules.
    pub name: String,
    /// Sub-rules. Only terminal actions are allowed.
    pub rules: Vec<Rule>,
}

impl RuleGroup {
    /// Creates a group. Rules are kept in ascending priority.
    pub fn new(name: impl Into<String>, mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self {
            name: name.into(),
            rules,
        }
    }

    /// Returns the first sub-rule matching the request.
    pub fn first_match(&self, request: &InboundRequest) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.statement.matches(request))
    }

    /// Returns true if the group contains a sub-rule with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.name == name)
    }
}

/// A complete, serializable rule configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    /// Action used when no rule matches.
    #[serde(default)]
    pub default_action: RuleAction,
    /// Top-level rules.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Groups available for delegation.
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

impl RuleTable {
    /// Creates an empty table with the default `allow` action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds a group.
    pub fn with_group(mut self, group: RuleGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Sets the default action.
    pub fn with_default_action(mut self, action: RuleAction) -> Self {
        self.default_action = action;
        self
    }

    /// Builds the stock web ACL scoped to `/api`.
    ///
    /// Priority 0 challenges HTML `GET` navigations. Priority 10 sends `/api`
    /// traffic to `bot-control`, turning each of its blocks into a challenge.
    pub fn default_web_acl() -> Self {
        Self::default_web_acl_for("/api")
    }

    /// Builds the stock web ACL with bot control scoped to `api_prefix`.
    pub fn default_web_acl_for(api_prefix: &str) -> Self {
        let force_interstitial = Rule::new(
            FORCE_INTERSTITIAL_RULE,
            0,
            Condition::And(vec![
                Condition::header("Accept", MatchOperator::Contains, "text/html"),
                Condition::method("GET"),
            ]),
            Action::Challenge,
        );

        let overrides = [
            TGT_VOLUMETRIC_SESSION,
            TGT_SIGNAL_AUTOMATED_BROWSER,
            TGT_SIGNAL_BROWSER_INCONSISTENCY,
        ]
        .into_iter()
        .map(|name| (name.to_string(), RuleAction::Challenge))
        .collect();

        let bot_control = Rule::new(
            TARGETED_BOT_CONTROL_RULE,
            10,
            Condition::path_prefix(api_prefix),
            Action::Delegate {
                group: BOT_CONTROL_GROUP.to_string(),
                overrides,
            },
        );

        Self::new()
            .with_rule(force_interstitial)
            .with_rule(bot_control)
            .with_group(bot_control_group())
    }

    /// Parses a table from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a table from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Serializes the table as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Which rule produced the action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RuleSource {
    /// No rule matched; the default action applied.
    #[default]
    None,
    /// A top-level rule matched.
    Rule {
        /// Rule name.
        rule_name: String,
        /// Rule priority.
        priority: u32,
    },
    /// A delegating rule matched and a group sub-rule decided.
    GroupRule {
        /// Delegating rule name.
        rule_name: String,
        /// Group name.
        group: String,
        /// Sub-rule that matched.
        sub_rule: String,
        /// Whether an override replaced the sub-rule's native action.
        overridden: bool,
    },
}

impl RuleSource {
    /// Returns the top-level rule name if a rule triggered.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            RuleSource::None => None,
            RuleSource::Rule { rule_name, .. } | RuleSource::GroupRule { rule_name, .. } => {
                Some(rule_name)
            }
        }
    }

    /// Returns the group sub-rule name if delegation decided.
    pub fn sub_rule(&self) -> Option<&str> {
        match self {
            RuleSource::GroupRule { sub_rule, .. } => Some(sub_rule),
            _ => None,
        }
    }

    /// Returns true if a rule triggered.
    pub fn has_rule(&self) -> bool {
        !matches!(self, RuleSource::None)
    }
}

/// Result of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    /// The action to take.
    pub action: RuleAction,
    /// Which rule triggered the action.
    pub source: RuleSource,
}

impl Evaluation {
    /// The default outcome with no rule source.
    pub fn default_action(action: RuleAction) -> Self {
        Self {
            action,
            source: RuleSource::None,
        }
    }

    /// Returns true if the action is Allow.
    pub fn should_allow(&self) -> bool {
        self.action == RuleAction::Allow
    }

    /// Returns true if the action is Challenge.
    pub fn should_challenge(&self) -> bool {
        self.action == RuleAction::Challenge
    }

    /// Returns true if the action is Block.
    pub fn should_block(&self) -> bool {
        self.action == RuleAction::Block
    }
}

/// Validated, read-only rule engine.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    groups: HashMap<String, RuleGroup>,
    default_action: RuleAction,
}

impl RuleEngine {
    /// Validates a table and builds an engine from it.
    pub fn new(table: RuleTable) -> Result<Self> {
        let mut groups = HashMap::new();
        for group in table.groups {
            validate_rules(&group.rules, Some(&group.name))?;
            if groups.contains_key(&group.name) {
                return Err(malformed(&group.name, "duplicate group name"));
            }
            let group = RuleGroup::new(group.name, group.rules);
            groups.insert(group.name.clone(), group);
        }

        validate_rules(&table.rules, None)?;
        for rule in &table.rules {
            if let Action::Delegate { group, overrides } = &rule.action {
                let target = groups.get(group).ok_or_else(|| {
                    malformed(&rule.name, format!("delegates to unknown group '{group}'"))
                })?;
                if let Some(unknown) = overrides.keys().find(|name| !target.contains(name)) {
                    return Err(malformed(
                        &rule.name,
                        format!("override '{unknown}' names no rule in group '{group}'"),
                    ));
                }
            }
        }

        let mut rules = table.rules;
        rules.sort_by_key(|r| r.priority);

        Ok(Self {
            rules,
            groups,
            default_action: table.default_action,
        })
    }

    /// Builds an engine from [`RuleTable::default_web_acl`].
    pub fn with_defaults() -> Self {
        Self {
            rules: RuleTable::default_web_acl().rules,
            groups: HashMap::from([(BOT_CONTROL_GROUP.to_string(), bot_control_group())]),
            default_action: RuleAction::Allow,
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Looks up a group.
    pub fn group(&self, name: &str) -> Option<&RuleGroup> {
        self.groups.get(name)
    }

    /// Evaluates a request. Pure and deterministic.
    pub fn evaluate(&self, request: &InboundRequest) -> Evaluation {
        for rule in &self.rules {
            if !rule.statement.matches(request) {
                continue;
            }

            match &rule.action {
                Action::Delegate { group, overrides } => {
                    let Some(sub_rule) = self
                        .groups
                        .get(group)
                        .and_then(|g| g.first_match(request))
                    else {
                        debug!(rule = %rule.name, group = %group, "Group matched nothing, continuing");
                        continue;
                    };

                    let native = sub_rule.action.terminal().unwrap_or_default();
                    let (action, overridden) = match overrides.get(&sub_rule.name) {
                        Some(action) => (*action, true),
                        None => (native, false),
                    };
                    debug!(
                        rule = %rule.name,
                        group = %group,
                        sub_rule = %sub_rule.name,
                        action = action.name(),
                        "Group rule matched"
                    );
                    return Evaluation {
                        action,
                        source: RuleSource::GroupRule {
                            rule_name: rule.name.clone(),
                            group: group.clone(),
                            sub_rule: sub_rule.name.clone(),
                            overridden,
                        },
                    };
                }
                terminal => {
                    let action = terminal.terminal().unwrap_or_default();
                    debug!(rule = %rule.name, action = action.name(), "Rule matched");
                    return Evaluation {
                        action,
                        source: RuleSource::Rule {
                            rule_name: rule.name.clone(),
                            priority: rule.priority,
                        },
                    };
                }
            }
        }

        Evaluation::default_action(self.default_action)
    }
}

fn validate_rules(rules: &[Rule], group: Option<&str>) -> Result<()> {
    let mut names = HashSet::new();
    let mut priorities = HashSet::new();

    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(malformed(group.unwrap_or(""), "rule has an empty name"));
        }
        if !names.insert(rule.name.as_str()) {
            return Err(malformed(&rule.name, "duplicate rule name"));
        }
        if !priorities.insert(rule.priority) {
            return Err(malformed(
                &rule.name,
                format!("duplicate priority {}", rule.priority),
            ));
        }
        rule.statement
            .validate()
            .map_err(|reason| malformed(&rule.name, reason))?;
        if let (Some(group), Action::Delegate { .. }) = (group, &rule.action) {
            return Err(malformed(
                &rule.name,
                format!("rule in group '{group}' cannot delegate"),
            ));
        }
    }

    Ok(())
}
