//! Outreach Channels
//!
//! Closed set of delivery channels, per-channel throttling ceilings, and
//! the adapter contract concrete transports implement.

use crate::prospect::Prospect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A delivery channel. Dispatch is by variant, never by string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    LinkedIn,
    WhatsApp,
    Sms,
    Phone,
}

impl Channel {
    /// All channels, in the fixed order the dispatcher iterates them.
    pub const ALL: [Channel; 5] = [
        Channel::Email,
        Channel::LinkedIn,
        Channel::WhatsApp,
        Channel::Sms,
        Channel::Phone,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Channel::Email => "Email",
            Channel::LinkedIn => "LinkedIn",
            Channel::WhatsApp => "WhatsApp",
            Channel::Sms => "SMS",
            Channel::Phone => "Phone Call",
        }
    }

    /// Default ceiling on messages per rate window.
    pub fn default_ceiling(&self) -> u32 {
        match self {
            Channel::Email => 50,
            Channel::LinkedIn => 25,
            Channel::WhatsApp => 30,
            Channel::Sms => 40,
            Channel::Phone => 10,
        }
    }

    /// Wall-clock window the ceiling applies to.
    pub fn rate_window(&self) -> Duration {
        match self {
            Channel::Email | Channel::WhatsApp | Channel::Sms => Duration::from_secs(3600),
            Channel::LinkedIn | Channel::Phone => Duration::from_secs(86_400),
        }
    }

    /// Whether the channel addresses prospects by phone number.
    pub fn uses_phone(&self) -> bool {
        matches!(self, Channel::WhatsApp | Channel::Sms | Channel::Phone)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Per-campaign overrides of the channel ceilings. Ceilings are hard caps
/// on one batch per window, never targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub emails_per_hour: Option<u32>,
    pub linkedin_per_day: Option<u32>,
    pub whatsapp_per_hour: Option<u32>,
    pub sms_per_hour: Option<u32>,
    pub calls_per_day: Option<u32>,
}

impl ThrottleConfig {
    /// Effective ceiling for a channel. Always at least 1 so a configured
    /// zero cannot stall a run forever.
    pub fn ceiling(&self, channel: Channel) -> u32 {
        let configured = match channel {
            Channel::Email => self.emails_per_hour,
            Channel::LinkedIn => self.linkedin_per_day,
            Channel::WhatsApp => self.whatsapp_per_hour,
            Channel::Sms => self.sms_per_hour,
            Channel::Phone => self.calls_per_day,
        };
        configured.unwrap_or_else(|| channel.default_ceiling()).max(1)
    }
}

/// A fully rendered, ready-to-transmit message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
}

/// Transport acknowledgement for one delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

/// Per-send failure. Recovered inside the dispatcher; all variants are
/// treated identically (counted, not retried within the run).
#[derive(Error, Debug, Clone)]
pub enum SendError {
    #[error("provider rejected message: {0}")]
    Rejected(String),

    #[error("send timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Contract a concrete transport supplies. Per-send timeouts are the
/// adapter's responsibility.
#[async_trait::async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;
    async fn send(
        &self,
        prospect: &Prospect,
        message: &RenderedMessage,
    ) -> Result<DeliveryReceipt, SendError>;
}

/// Lookup table from channel to its registered adapter.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        tracing::info!(channel = %adapter.channel(), "registering channel adapter");
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_falls_back_to_channel_default() {
        let throttle = ThrottleConfig::default();
        assert_eq!(throttle.ceiling(Channel::Email), 50);
        assert_eq!(throttle.ceiling(Channel::LinkedIn), 25);
    }

    #[test]
    fn test_ceiling_override() {
        let throttle = ThrottleConfig {
            emails_per_hour: Some(2),
            ..Default::default()
        };
        assert_eq!(throttle.ceiling(Channel::Email), 2);
        assert_eq!(throttle.ceiling(Channel::Sms), 40);
    }

    #[test]
    fn test_zero_ceiling_is_clamped() {
        let throttle = ThrottleConfig {
            sms_per_hour: Some(0),
            ..Default::default()
        };
        assert_eq!(throttle.ceiling(Channel::Sms), 1);
    }

    #[test]
    fn test_daily_channels_use_daily_window() {
        assert_eq!(Channel::LinkedIn.rate_window().as_secs(), 86_400);
        assert_eq!(Channel::Email.rate_window().as_secs(), 3_600);
    }
}
