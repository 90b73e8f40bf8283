use serde::{Deserialize, Serialize};

/// Profit classification driving alert urgency and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTier {
    HighProfit,
    GoodDeal,
    DealDetected,
    ResearchRequired,
}

impl AlertTier {
    /// Whether alerts of this tier ping the notify role.
    pub fn notifies(self) -> bool {
        !matches!(self, AlertTier::ResearchRequired)
    }

    pub fn label(self) -> &'static str {
        match self {
            AlertTier::HighProfit => "high_profit",
            AlertTier::GoodDeal => "good_deal",
            AlertTier::DealDetected => "deal_detected",
            AlertTier::ResearchRequired => "research_required",
        }
    }
}

/// Sold-price statistics and profit estimate for one alert.
///
/// All statistics are `0.0` when `sample_count == 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitAnalysis {
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
    pub buy_price: f64,
    /// `median - buy_price`.
    pub estimated_profit: f64,
    /// Only defined when `buy_price > 0` and there is data.
    pub profit_percent: Option<f64>,
    pub tier: AlertTier,
}

impl ProfitAnalysis {
    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}

/// Product details pulled out of an inbound alert embed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAlert {
    pub product_name: String,
    pub buy_price: f64,
    /// Pre-rendered `**name:** value` lines from status/stock fields.
    pub status_lines: Vec<String>,
    pub product_links: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub image_url: Option<String>,
    /// Author name of the inbound embed.
    pub source: String,
}

/// One processed alert, emitted as a JSON line by the reporter.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub timestamp: String,
    pub channel_id: u64,
    pub product_name: String,
    pub buy_price: f64,
    pub tier: AlertTier,
    pub sample_count: usize,
    pub median: f64,
    pub estimated_profit: f64,
    pub profit_percent: Option<f64>,
    /// False in dry-run mode or when the post failed.
    pub posted: bool,
}
