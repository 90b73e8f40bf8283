use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analyzer::analyze;
use crate::config::WatchSettings;
use crate::discord::{AllowedMentions, CreateMessage, DiscordClient, Embed, Message};
use crate::error::AlertError;
use crate::extract::extract_product;
use crate::formatter::AlertFormatter;
use crate::reporter;
use crate::sampler::{ListingSampler, fetch_sold_prices};
use crate::types::AlertRecord;

/// A formatted alert ready to post, plus its report line.
#[derive(Debug, Clone)]
pub struct OutgoingAlert {
    pub message: CreateMessage,
    pub record: AlertRecord,
}

/// Turns product alert embeds in the monitored channel into resale alerts.
///
/// Holds no per-event state, so one instance is shared across concurrently
/// handled messages.
pub struct ChannelWatcher {
    settings: WatchSettings,
    sampler: Arc<dyn ListingSampler>,
    formatter: AlertFormatter,
    sample_timeout: Duration,
    /// `None` in dry-run mode.
    poster: Option<DiscordClient>,
    bot_user_id: OnceLock<String>,
}

impl ChannelWatcher {
    pub fn new(
        settings: WatchSettings,
        sampler: Arc<dyn ListingSampler>,
        sample_timeout: Duration,
        poster: Option<DiscordClient>,
    ) -> Self {
        Self {
            formatter: AlertFormatter::new(settings.notify_role_id),
            settings,
            sampler,
            sample_timeout,
            poster,
            bot_user_id: OnceLock::new(),
        }
    }

    /// Record the bot's own user ID (from READY) so its posts are ignored.
    pub fn set_bot_user(&self, user_id: String) {
        if self.bot_user_id.set(user_id).is_err() {
            debug!("Bot user already known, ignoring repeated READY");
        }
    }

    /// Monitored channel, not our own message, and at least one embed.
    pub fn accepts(&self, msg: &Message) -> bool {
        if msg.channel_id.parse::<u64>().ok() != Some(self.settings.monitored_channel_id) {
            return false;
        }
        if self.bot_user_id.get() == Some(&msg.author.id) {
            return false;
        }
        !msg.embeds.is_empty()
    }

    /// Run one embed through extraction, sampling, analysis and formatting.
    pub async fn prepare_alert(&self, embed: &Embed) -> Result<OutgoingAlert, AlertError> {
        let product = extract_product(embed)?;
        info!("Searching eBay for: {}", product.product_name);

        let samples =
            fetch_sold_prices(self.sampler.as_ref(), &product.product_name, self.sample_timeout)
                .await;
        let analysis = analyze(product.buy_price, &samples)?;

        let status = if product.status_lines.is_empty() {
            None
        } else {
            Some(product.status_lines.join("\n"))
        };
        let content = self.formatter.format(
            &product.product_name,
            &analysis,
            &product.product_links,
            status.as_deref(),
        );

        let now = Utc::now();
        let embed = self.formatter.media_embed(&product, &analysis, now);
        let roles = self
            .formatter
            .mentioned_role(analysis.tier)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default();

        info!(
            "\"{}\" → {} (buy {:.2}, median {:.2}, {} sales)",
            product.product_name,
            analysis.tier.label(),
            analysis.buy_price,
            analysis.median,
            analysis.sample_count,
        );

        Ok(OutgoingAlert {
            message: CreateMessage {
                content,
                embeds: vec![embed],
                allowed_mentions: AllowedMentions {
                    parse: vec![],
                    roles,
                },
            },
            record: AlertRecord {
                timestamp: now.to_rfc3339(),
                channel_id: self.settings.alert_channel_id,
                product_name: product.product_name,
                buy_price: analysis.buy_price,
                tier: analysis.tier,
                sample_count: analysis.sample_count,
                median: analysis.median,
                estimated_profit: analysis.estimated_profit,
                profit_percent: analysis.profit_percent,
                posted: false,
            },
        })
    }

    /// Handle one gateway message. Returns the report line of every alert
    /// produced, with `posted` set when Discord accepted it.
    ///
    /// Failures are logged per embed; nothing here stops the watcher.
    pub async fn handle_message(&self, msg: &Message) -> Vec<AlertRecord> {
        if !self.accepts(msg) {
            return Vec::new();
        }

        let mut produced = Vec::new();
        for (idx, embed) in msg.embeds.iter().enumerate() {
            let mut alert = match self.prepare_alert(embed).await {
                Ok(alert) => alert,
                Err(AlertError::MalformedEvent(reason)) => {
                    debug!("Skipping embed {idx} of message {}: {reason}", msg.id);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping embed {idx} of message {}: {e}", msg.id);
                    continue;
                }
            };

            match &self.poster {
                Some(client) => {
                    match client
                        .create_message(self.settings.alert_channel_id, &alert.message)
                        .await
                    {
                        Ok(_) => alert.record.posted = true,
                        Err(e) => warn!("Failed to post alert for message {}: {e:#}", msg.id),
                    }
                }
                None => info!("[dry-run] would post:\n{}", alert.message.content),
            }

            reporter::report_alert(&alert.record);
            produced.push(alert.record);
        }
        produced
    }
}
