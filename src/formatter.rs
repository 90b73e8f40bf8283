use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::CURRENCY_SYMBOL;
use crate::discord::{Embed, EmbedFooter, EmbedMedia};
use crate::sampler::sold_listings_url;
use crate::types::{AlertTier, ProductAlert, ProfitAnalysis};

/// Discord rejects message content longer than this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Product links listed before the sold-listings link.
pub const MAX_PRODUCT_LINKS: usize = 5;

const COLOR_PROFITABLE: u32 = 0x2ECC71;
const COLOR_NEUTRAL: u32 = 0xE67E22;

fn money(amount: f64) -> String {
    format!("{CURRENCY_SYMBOL}{amount:.2}")
}

/// Headline shown after the (optional) role mention.
pub fn headline(tier: AlertTier) -> &'static str {
    match tier {
        AlertTier::HighProfit => "🔥 **HIGH PROFIT DEAL!** 🔥",
        AlertTier::GoodDeal => "🚨 **New Deal Alert!**",
        AlertTier::DealDetected => "💼 **Deal Detected**",
        AlertTier::ResearchRequired => "ℹ️ **Product Alert** (Research Required)",
    }
}

fn profit_emoji(tier: AlertTier) -> &'static str {
    match tier {
        AlertTier::HighProfit => "🟢",
        AlertTier::GoodDeal => "🟡",
        AlertTier::DealDetected => "🔵",
        AlertTier::ResearchRequired => "⚪",
    }
}

/// Cut `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Renders analyses into Discord messages.
#[derive(Debug, Clone, Default)]
pub struct AlertFormatter {
    notify_role_id: Option<u64>,
}

impl AlertFormatter {
    pub fn new(notify_role_id: Option<u64>) -> Self {
        Self { notify_role_id }
    }

    /// Role ID to allow in `allowed_mentions` for this tier, if any.
    pub fn mentioned_role(&self, tier: AlertTier) -> Option<u64> {
        self.notify_role_id.filter(|_| tier.notifies())
    }

    /// Compose the alert text.
    ///
    /// Statistics are only rendered when the analysis has data; otherwise the
    /// message says so explicitly.
    pub fn format(
        &self,
        product_name: &str,
        analysis: &ProfitAnalysis,
        product_links: &[String],
        status: Option<&str>,
    ) -> String {
        let mut out = String::new();

        if let Some(role) = self.mentioned_role(analysis.tier) {
            let _ = write!(out, "<@&{role}> ");
        }
        let _ = writeln!(out, "{}", headline(analysis.tier));
        let _ = writeln!(out, "**💰 {product_name}**");
        out.push('\n');

        if !analysis.has_data() {
            out.push_str("❓ **NO EBAY DATA**\n");
            out.push_str("Could not find recent sold listings (no data). Research required!\n");
        } else if analysis.estimated_profit > 0.0 {
            out.push_str("🎯 **ESTIMATED PROFIT**\n");
            let _ = write!(
                out,
                "{} **{}** profit",
                profit_emoji(analysis.tier),
                money(analysis.estimated_profit)
            );
            if let Some(pct) = analysis.profit_percent {
                let _ = write!(out, " ({pct:.1}%)");
            }
            out.push('\n');
            let _ = writeln!(out, "*Based on {} recent eBay sales*", analysis.sample_count);
        } else {
            out.push_str("⚠️ **LOW PROFIT MARGIN**\n");
            let _ = writeln!(
                out,
                "Recent eBay sales suggest minimal profit potential ({} sales)",
                analysis.sample_count
            );
        }

        out.push_str("\n📊 **Price Analysis**\n");
        let _ = writeln!(out, "🏷️ **Buy Price:** {}", money(analysis.buy_price));
        if analysis.has_data() {
            let _ = writeln!(out, "📊 **eBay Median Sold:** {}", money(analysis.median));
            let _ = writeln!(out, "📈 **eBay Average:** {}", money(analysis.mean));
            let _ = writeln!(
                out,
                "💵 **Range:** {} - {}",
                money(analysis.min),
                money(analysis.max)
            );
        } else {
            out.push_str("❌ **Resell Data:** Not available (no data)\n");
        }

        if let Some(status) = status.filter(|s| !s.trim().is_empty()) {
            out.push_str("\n📦 **Product Info**\n");
            let _ = writeln!(out, "{status}");
        }

        out.push_str("\n🔗 **Links**\n");
        for link in product_links.iter().take(MAX_PRODUCT_LINKS) {
            let _ = writeln!(out, "{link}");
        }
        let _ = write!(
            out,
            "[🔍 eBay Sold Listings](<{}>)",
            sold_listings_url(product_name)
        );

        truncate_chars(out, MAX_CONTENT_CHARS)
    }

    /// Companion embed carrying the inbound alert's images and source.
    pub fn media_embed(
        &self,
        product: &ProductAlert,
        analysis: &ProfitAnalysis,
        timestamp: DateTime<Utc>,
    ) -> Embed {
        let color = if analysis.tier.notifies() {
            COLOR_PROFITABLE
        } else {
            COLOR_NEUTRAL
        };

        let mut footer = product.source.clone();
        if analysis.has_data() {
            let _ = write!(footer, " | Data from {} eBay sales", analysis.sample_count);
        }

        Embed {
            title: Some(truncate_chars(format!("💰 {}", product.product_name), 256)),
            url: Some(sold_listings_url(&product.product_name)),
            color: Some(color),
            timestamp: Some(timestamp.to_rfc3339()),
            thumbnail: product.thumbnail_url.clone().map(|url| EmbedMedia { url }),
            image: product.image_url.clone().map(|url| EmbedMedia { url }),
            footer: Some(EmbedFooter { text: footer }),
            ..Default::default()
        }
    }
}
