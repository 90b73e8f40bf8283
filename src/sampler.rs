use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EbayConfig;
use crate::extract::find_price;
use crate::{EBAY_FINDING_API, EBAY_SOLD_SEARCH_URL};

/// Browser-like UA for the public search page, which rejects bare clients.
const PAGE_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0 Safari/537.36";

/// Placeholder card eBay renders at the top of every result list.
const PLACEHOLDER_TITLE: &str = "Shop on eBay";

/// Source of recent sold prices for a search query.
#[async_trait]
pub trait ListingSampler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transports this sampler may try in sequence for one query, each
    /// allowed a full per-call timeout.
    fn attempts(&self) -> u32 {
        1
    }

    /// Recent completed-sale prices matching `query`. May be empty.
    async fn fetch(&self, query: &str) -> Result<Vec<f64>>;
}

/// eBay search link restricted to sold, completed listings.
pub fn sold_listings_url(query: &str) -> String {
    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("_nkw", query.trim())
        .append_pair("LH_Sold", "1")
        .append_pair("LH_Complete", "1")
        .finish();
    format!("{EBAY_SOLD_SEARCH_URL}?{params}")
}

/// Fetch sold prices, degrading every failure to an empty sample.
///
/// `timeout` bounds each transport attempt, so the whole call is bounded by
/// `timeout * sampler.attempts()`. Errors are logged and never propagated.
pub async fn fetch_sold_prices(
    sampler: &dyn ListingSampler,
    query: &str,
    timeout: Duration,
) -> Vec<f64> {
    let budget = timeout * sampler.attempts();
    match tokio::time::timeout(budget, sampler.fetch(query)).await {
        Ok(Ok(prices)) => {
            debug!("{} returned {} sold prices for \"{query}\"", sampler.name(), prices.len());
            prices
        }
        Ok(Err(e)) => {
            warn!("{} failed for \"{query}\": {e:#}", sampler.name());
            Vec::new()
        }
        Err(_) => {
            warn!("{} timed out after {budget:?} for \"{query}\"", sampler.name());
            Vec::new()
        }
    }
}

/// Pick the sampler chain for the configured credentials.
pub fn build_sampler(config: &EbayConfig) -> Result<Arc<dyn ListingSampler>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api = match config.app_id.as_deref().filter(|id| !id.is_empty()) {
        Some(app_id) => Some(FindingApiSampler::new(
            app_id,
            &config.global_id,
            config.max_results,
            timeout,
        )?),
        None => None,
    };
    let page = if config.page_fallback {
        Some(SoldPageSampler::new(config.max_results, timeout)?)
    } else {
        None
    };

    let sampler: Arc<dyn ListingSampler> = match (api, page) {
        (Some(api), Some(page)) => Arc::new(FallbackSampler::new(api, page, timeout)),
        (Some(api), None) => Arc::new(api),
        (None, Some(page)) => {
            info!("No eBay app ID configured, using sold listings page only");
            Arc::new(page)
        }
        (None, None) => {
            warn!("No eBay app ID configured and page fallback disabled, every alert will need research");
            Arc::new(UnconfiguredSampler)
        }
    };
    Ok(sampler)
}

// ── Finding API ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FindingResponse {
    #[serde(rename = "findCompletedItemsResponse", default)]
    responses: Vec<CompletedItemsResponse>,
}

#[derive(Debug, Deserialize)]
struct CompletedItemsResponse {
    #[serde(default)]
    ack: Vec<String>,
    #[serde(rename = "searchResult", default)]
    search_result: Vec<SearchResult>,
    #[serde(rename = "errorMessage", default)]
    error_message: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    item: Vec<CompletedItem>,
}

#[derive(Debug, Deserialize)]
struct CompletedItem {
    #[serde(rename = "sellingStatus", default)]
    selling_status: Vec<SellingStatus>,
}

#[derive(Debug, Deserialize)]
struct SellingStatus {
    #[serde(rename = "convertedCurrentPrice", default)]
    converted_current_price: Vec<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    #[serde(rename = "__value__")]
    value: String,
}

/// Extract positive sold prices from a `findCompletedItems` JSON body.
pub fn parse_finding_response(body: &str) -> Result<Vec<f64>> {
    let resp: FindingResponse =
        serde_json::from_str(body).context("failed to parse Finding API response")?;
    let Some(result) = resp.responses.into_iter().next() else {
        anyhow::bail!("Finding API response missing findCompletedItemsResponse");
    };

    let ack = result.ack.first().map(String::as_str).unwrap_or("");
    if ack != "Success" && ack != "Warning" {
        let detail = serde_json::to_string(&result.error_message).unwrap_or_default();
        anyhow::bail!("Finding API ack {ack:?}: {detail}");
    }

    let prices = result
        .search_result
        .into_iter()
        .flat_map(|r| r.item)
        .filter_map(|item| {
            let amount = item.selling_status.into_iter().next()?;
            let price = amount.converted_current_price.into_iter().next()?;
            Decimal::from_str(price.value.trim()).ok()?.to_f64()
        })
        .filter(|p| *p > 0.0)
        .collect();
    Ok(prices)
}

/// eBay Finding API `findCompletedItems` client.
pub struct FindingApiSampler {
    http: reqwest::Client,
    app_id: String,
    global_id: String,
    max_results: usize,
}

impl FindingApiSampler {
    pub fn new(app_id: &str, global_id: &str, max_results: usize, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            app_id: app_id.to_string(),
            global_id: global_id.to_string(),
            max_results,
        })
    }
}

#[async_trait]
impl ListingSampler for FindingApiSampler {
    fn name(&self) -> &'static str {
        "finding-api"
    }

    async fn fetch(&self, query: &str) -> Result<Vec<f64>> {
        let entries = self.max_results.to_string();
        let resp = self
            .http
            .get(EBAY_FINDING_API)
            .query(&[
                ("OPERATION-NAME", "findCompletedItems"),
                ("SERVICE-VERSION", "1.0.0"),
                ("SECURITY-APPNAME", self.app_id.as_str()),
                ("RESPONSE-DATA-FORMAT", "JSON"),
                ("REST-PAYLOAD", ""),
                ("keywords", query.trim()),
                ("itemFilter(0).name", "SoldItemsOnly"),
                ("itemFilter(0).value", "true"),
                ("itemFilter(1).name", "ListingType"),
                ("itemFilter(1).value(0)", "FixedPrice"),
                ("itemFilter(1).value(1)", "AuctionWithBIN"),
                ("sortOrder", "EndTimeSoonest"),
                ("paginationInput.entriesPerPage", entries.as_str()),
                ("GLOBAL-ID", self.global_id.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let snippet: String = body.chars().take(200).collect();
            anyhow::bail!("Finding API returned {status}: {snippet}");
        }

        let mut prices = parse_finding_response(&body)?;
        prices.truncate(self.max_results);
        Ok(prices)
    }
}

// ── Sold listings page ─────────────────────────────────────────────

/// Scrape sold prices from the public search results page.
///
/// Price ranges contribute their lower bound.
pub fn parse_sold_page(html: &str, max_results: usize) -> Result<Vec<f64>> {
    let item_sel =
        Selector::parse("li.s-item").map_err(|e| anyhow::anyhow!("invalid selector: {e:?}"))?;
    let title_sel =
        Selector::parse(".s-item__title").map_err(|e| anyhow::anyhow!("invalid selector: {e:?}"))?;
    let price_sel =
        Selector::parse(".s-item__price").map_err(|e| anyhow::anyhow!("invalid selector: {e:?}"))?;

    let document = Html::parse_document(html);
    let mut prices = Vec::new();

    for item in document.select(&item_sel) {
        let title: String = item
            .select(&title_sel)
            .next()
            .map(|t| t.text().collect())
            .unwrap_or_default();
        if title.trim() == PLACEHOLDER_TITLE {
            continue;
        }

        let price_text: String = match item.select(&price_sel).next() {
            Some(p) => p.text().collect(),
            None => continue,
        };
        if let Some(price) = find_price(&price_text).filter(|p| *p > 0.0) {
            prices.push(price);
            if prices.len() >= max_results {
                break;
            }
        }
    }

    Ok(prices)
}

/// Fallback transport reading the sold listings search page.
pub struct SoldPageSampler {
    http: reqwest::Client,
    max_results: usize,
}

impl SoldPageSampler {
    pub fn new(max_results: usize, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(PAGE_USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, max_results })
    }
}

#[async_trait]
impl ListingSampler for SoldPageSampler {
    fn name(&self) -> &'static str {
        "sold-page"
    }

    async fn fetch(&self, query: &str) -> Result<Vec<f64>> {
        let url = sold_listings_url(query);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("sold listings page returned {status}");
        }
        let html = resp.text().await?;
        parse_sold_page(&html, self.max_results)
    }
}

// ── Combinators ────────────────────────────────────────────────────

/// Uses `secondary` only when `primary` errors or exceeds `leg_timeout`.
/// An empty primary result is a valid answer and is returned as-is.
///
/// Each leg gets its own `leg_timeout`, so a primary that fails at its
/// deadline still leaves the secondary a full window.
pub struct FallbackSampler<P, S> {
    primary: P,
    secondary: S,
    leg_timeout: Duration,
}

impl<P, S> FallbackSampler<P, S> {
    pub fn new(primary: P, secondary: S, leg_timeout: Duration) -> Self {
        Self {
            primary,
            secondary,
            leg_timeout,
        }
    }
}

#[async_trait]
impl<P: ListingSampler, S: ListingSampler> ListingSampler for FallbackSampler<P, S> {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn attempts(&self) -> u32 {
        self.primary.attempts() + self.secondary.attempts()
    }

    async fn fetch(&self, query: &str) -> Result<Vec<f64>> {
        let primary_budget = self.leg_timeout * self.primary.attempts();
        match tokio::time::timeout(primary_budget, self.primary.fetch(query)).await {
            Ok(Ok(prices)) => return Ok(prices),
            Ok(Err(e)) => warn!(
                "{} failed ({e:#}), falling back to {}",
                self.primary.name(),
                self.secondary.name()
            ),
            Err(_) => warn!(
                "{} timed out after {primary_budget:?}, falling back to {}",
                self.primary.name(),
                self.secondary.name()
            ),
        }

        let secondary_budget = self.leg_timeout * self.secondary.attempts();
        tokio::time::timeout(secondary_budget, self.secondary.fetch(query))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "{} timed out after {secondary_budget:?}",
                    self.secondary.name()
                )
            })?
    }
}

/// Stand-in when no marketplace transport is configured.
pub struct UnconfiguredSampler;

#[async_trait]
impl ListingSampler for UnconfiguredSampler {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn fetch(&self, _query: &str) -> Result<Vec<f64>> {
        anyhow::bail!("marketplace credential not configured")
    }
}
