//! Compliance Gate
//!
//! Pre-flight validation preventing a campaign from becoming active
//! without required consent and opt-out mechanisms. Purely a checking
//! function: failures come back as a reason list, never as panics, and
//! the caller decides whether to block creation.

use crate::channel::Channel;
use crate::CampaignDraft;
use serde::{Deserialize, Serialize};

/// EU/EEA members, for GDPR applicability by geography focus.
const EU_EEA: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IS",
    "IT", "LI", "LV", "LT", "LU", "MT", "NL", "NO", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

/// Outcome of validating one campaign draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub valid: bool,
    pub reasons: Vec<String>,
}

/// Stateless policy checker for campaign drafts.
#[derive(Debug, Clone, Default)]
pub struct ComplianceValidator;

impl ComplianceValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, draft: &CampaignDraft) -> ComplianceReport {
        let mut reasons = Vec::new();
        let flags = &draft.config.compliance;

        if !flags.unsubscribe_enabled {
            reasons.push("unsubscribe mechanism must be enabled".to_string());
        }
        if !flags.opt_out_tracking {
            reasons.push("opt-out tracking must be enabled".to_string());
        }
        if !flags.spam_compliance {
            reasons.push("spam compliance flag is not set".to_string());
        }
        if draft.primary_channel == Channel::Email && !flags.can_spam_compliance {
            reasons.push("email campaigns require CAN-SPAM compliance".to_string());
        }
        if self.targets_eu(draft) && !flags.gdpr_compliance {
            reasons.push("campaign targets EU/EEA geography without GDPR compliance".to_string());
        }

        match draft.primary_channel {
            Channel::Email => {
                for p in &draft.prospects {
                    match p.email.as_deref() {
                        Some(email) if valid_email(email) => {}
                        Some(email) => reasons.push(format!(
                            "prospect {} {} has invalid email address: {email}",
                            p.first_name, p.last_name
                        )),
                        None => reasons.push(format!(
                            "prospect {} {} is missing an email address",
                            p.first_name, p.last_name
                        )),
                    }
                }
            }
            ch if ch.uses_phone() => {
                for p in &draft.prospects {
                    match p.phone.as_deref() {
                        Some(phone) if valid_phone(phone) => {}
                        Some(phone) => reasons.push(format!(
                            "prospect {} {} has invalid phone number: {phone}",
                            p.first_name, p.last_name
                        )),
                        None => reasons.push(format!(
                            "prospect {} {} is missing a phone number",
                            p.first_name, p.last_name
                        )),
                    }
                }
            }
            _ => {}
        }

        ComplianceReport {
            valid: reasons.is_empty(),
            reasons,
        }
    }

    fn targets_eu(&self, draft: &CampaignDraft) -> bool {
        draft
            .config
            .geography_focus
            .iter()
            .any(|c| EU_EEA.contains(&c.to_uppercase().as_str()))
    }
}

/// RFC-shaped email check: `local@domain`, both non-empty, domain has an
/// interior dot.
pub fn valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Loose E.164 shape: optional `+`, then 10-15 digits after stripping
/// common separators.
pub fn valid_phone(phone: &str) -> bool {
    let trimmed = phone.trim();
    let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    digits.len() >= 10 && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit())
}
