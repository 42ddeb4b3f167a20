//! Notifications - winner delivery and the operational log channel

use std::sync::Arc;

use chrono::Utc;

use super::controller::SharedController;
use crate::platform::{ChannelId, Member, Messaging, Notice, NoticeTone, PlatformError};

/// How a winner notification reached them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Private,
    /// Private delivery failed; the notice was posted publicly instead
    PublicFallback,
    /// Both paths failed
    Undelivered,
}

/// Posts operational messages to the configured logs channel.
///
/// Posting never fails outward; problems are logged.
#[derive(Clone)]
pub struct OpsLog {
    messaging: Arc<dyn Messaging>,
    controller: SharedController,
}

impl OpsLog {
    pub fn new(messaging: Arc<dyn Messaging>, controller: SharedController) -> Self {
        Self { messaging, controller }
    }

    pub async fn post(&self, message: impl Into<String>) {
        let message = message.into();
        let Some(channel) = self.controller.settings().logs_channel else {
            log::debug!("No logs channel configured; dropping ops message: {}", message);
            return;
        };
        let notice = Notice {
            description: message,
            footer: Some(Utc::now().format("%d %B %Y %H:%M UTC").to_string()),
            ..Default::default()
        };
        if let Err(e) = self.messaging.send_public(channel, &notice).await {
            log::error!("Failed to send log message to channel {}: {}", channel, e);
        }
    }
}

pub struct NotificationDispatcher {
    messaging: Arc<dyn Messaging>,
}

impl NotificationDispatcher {
    pub fn new(messaging: Arc<dyn Messaging>) -> Self {
        Self { messaging }
    }

    /// Deliver privately, falling back to a public notice tagging the member
    pub async fn notify(&self, member: &Member, payload: &Notice, fallback: Option<ChannelId>) -> Delivery {
        log::info!("Attempting to DM {}.", member.name);
        let err = match self.messaging.send_private(member.id, payload).await {
            Ok(()) => {
                log::info!("Successfully sent DM to {}.", member.name);
                return Delivery::Private;
            }
            Err(e) => e,
        };

        match err {
            PlatformError::Refused(_) => log::warn!("Cannot DM {}: DMs are closed. Sending publicly.", member.name),
            ref other => log::warn!("Cannot DM {}: {}. Sending publicly.", member.name, other),
        }

        let Some(channel) = fallback else {
            log::error!("No fallback channel for {}; notification undelivered", member.name);
            return Delivery::Undelivered;
        };
        let public = payload
            .clone()
            .with_content(format!("{}, your DMs are closed!", member.mention()));
        match self.messaging.send_public(channel, &public).await {
            Ok(_) => Delivery::PublicFallback,
            Err(e) => {
                log::error!("Fallback notice for {} failed: {}", member.name, e);
                Delivery::Undelivered
            }
        }
    }
}

/// Private result sent to a winner
pub fn assignment_notice(task_number: u32, sheet_url: Option<&str>, role_name: &str, removal_hours: u64) -> Notice {
    let sheet = match sheet_url {
        Some(url) => format!("[Click here to access the task sheet]({})", url),
        None => "The task sheet has not been configured yet.".to_string(),
    };
    Notice::card(
        "🎉 Congratulations! Task Assigned",
        format!("You have been assigned **Task #{}**!", task_number),
    )
    .with_field("📋 Google Sheets Link", sheet, false)
    .with_field(
        "📝 Instructions",
        "Please fill in the **Proof link** column (Column E) in the sheet once you complete the task.",
        false,
    )
    .with_field(
        "⏰ Task Details",
        format!(
            "Task Number: **{}**\nRole: **{}** (will be removed in {} hours)",
            task_number, role_name, removal_hours
        ),
        false,
    )
    .with_footer("Good luck with your task!")
    .with_tone(NoticeTone::Success)
}
