//! Personalization Engine
//!
//! Renders one template against one prospect snapshot. Pure: no I/O, no
//! clock, no randomness. The same template, prospect, and config always
//! yield the same output, and rendering never fails — unresolved
//! variables become empty strings.

use crate::channel::RenderedMessage;
use crate::prospect::Prospect;
use crate::template::{MessageTemplate, RuleAction};
use crate::{CampaignConfig, PersonalizationLevel};
use regex::Regex;

pub struct PersonalizationEngine {
    token: Regex,
}

impl Default for PersonalizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonalizationEngine {
    pub fn new() -> Self {
        Self {
            token: Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid token pattern"),
        }
    }

    /// Render subject and body for one prospect.
    ///
    /// Pipeline: variable substitution, then conditional rules (at
    /// `Standard` level and above), then the contextual industry /
    /// geography suffix (at `Deep` level).
    pub fn render(
        &self,
        template: &MessageTemplate,
        prospect: &Prospect,
        config: Option<&CampaignConfig>,
    ) -> RenderedMessage {
        let level = config
            .map(|c| c.personalization_level)
            .unwrap_or(PersonalizationLevel::Standard);

        let subject = template
            .subject
            .as_deref()
            .map(|s| self.substitute(s, template, prospect));
        let mut body = self.substitute(&template.body, template, prospect);

        if level >= PersonalizationLevel::Standard {
            for rule in &template.rules {
                let actual = prospect
                    .field(&rule.condition.field)
                    .unwrap_or(serde_json::Value::Null);
                // Malformed rule operands never fail a render; the rule
                // just does not fire.
                let fired = rule
                    .condition
                    .op
                    .matches(&actual, &rule.condition.value)
                    .unwrap_or(false);
                if !fired {
                    continue;
                }
                match &rule.action {
                    RuleAction::ReplaceText { from, to } => {
                        body = body.replace(from.as_str(), to);
                    }
                    RuleAction::Prepend { text } => {
                        body = format!("{text}{body}");
                    }
                    RuleAction::Append { text } => {
                        body.push_str(text);
                    }
                }
            }
        }

        if level >= PersonalizationLevel::Deep {
            if let Some(config) = config {
                if let Some(suffix) = contextual_suffix(config, prospect) {
                    body.push_str(&suffix);
                }
            }
        }

        RenderedMessage {
            channel: template.channel,
            subject,
            body,
        }
    }

    /// Replace every `{variable}` token. Resolution order: built-in
    /// prospect field, custom field, declared variable default, empty
    /// string. Never leaves a literal token behind.
    fn substitute(&self, content: &str, template: &MessageTemplate, prospect: &Prospect) -> String {
        self.token
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match prospect.field(name) {
                    Some(value) => render_scalar(&value),
                    None => template.variable_default(name).unwrap_or("").to_string(),
                }
            })
            .into_owned()
    }
}

/// Campaign-context suffix appended when the campaign's focus matches the
/// prospect. Purely a function of the matched values.
fn contextual_suffix(config: &CampaignConfig, prospect: &Prospect) -> Option<String> {
    let mut suffix = String::new();

    if let Some(industry) = prospect.field("industry").map(|v| render_scalar(&v)) {
        if config
            .industry_focus
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&industry))
        {
            suffix.push_str(&format!(
                "\n\nP.S. We work with {industry} teams on exactly this every week."
            ));
        }
    }
    if let Some(country) = prospect.field("country").map(|v| render_scalar(&v)) {
        if config
            .geography_focus
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&country))
        {
            suffix.push_str(&format!("\n\nWe already serve clients in {country}."));
        }
    }

    if suffix.is_empty() {
        None
    } else {
        Some(suffix)
    }
}

/// JSON scalars render bare, without quotes; null renders empty.
fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
