//! Message Templates
//!
//! Canonical content for one channel: a body with `{variable}`
//! placeholders, declared variables, and ordered personalization rules.

use crate::channel::Channel;
use crate::rules::MatchOp;
use crate::TemplateId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub channel: Channel,
    pub subject: Option<String>,
    /// Body with `{variable}` placeholders.
    pub body: String,
    pub variables: Vec<TemplateVariable>,
    /// Applied in declaration order after substitution.
    pub rules: Vec<PersonalizationRule>,
    pub attachments: Vec<Attachment>,
}

impl MessageTemplate {
    pub fn new(channel: Channel, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            subject: None,
            body: body.into(),
            variables: Vec::new(),
            rules: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_rule(mut self, rule: PersonalizationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_variable(mut self, variable: TemplateVariable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Declared default for a variable, if any.
    pub fn variable_default(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .and_then(|v| v.default.as_deref())
    }
}

/// A declared template variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub kind: VariableKind,
    pub required: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    #[default]
    Text,
    Number,
    Boolean,
}

/// Conditional content mutation: fires when the condition matches the
/// prospect, then applies its action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizationRule {
    pub condition: RuleCondition,
    pub action: RuleAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub op: MatchOp,
    pub value: serde_json::Value,
}

/// Closed set of content mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    ReplaceText { from: String, to: String },
    Prepend { text: String },
    Append { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}
