use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::discord::Embed;
use crate::error::AlertError;
use crate::types::ProductAlert;

static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"£\s?(\d[\d,]*(?:\.\d+)?)").expect("valid price regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s\])]+").expect("valid url regex"));

/// First `£` amount in `text`, if any.
pub fn find_price(text: &str) -> Option<f64> {
    PRICE_RE.captures_iter(text).find_map(|caps| {
        let digits = caps.get(1)?.as_str().replace(',', "");
        Decimal::from_str(&digits).ok()?.to_f64()
    })
}

/// Product title with any embedded prices removed.
fn clean_title(title: &str) -> String {
    let stripped = PRICE_RE.replace_all(title, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull the product name, buy price and display details out of an alert embed.
///
/// The buy price comes from the first field named like a price (or holding a
/// `£` amount), falling back to the description, then to zero. A missing or
/// price-only title makes the embed unusable as a search query.
pub fn extract_product(embed: &Embed) -> Result<ProductAlert, AlertError> {
    let product_name = embed
        .title
        .as_deref()
        .map(clean_title)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AlertError::MalformedEvent("embed has no product title".into()))?;

    let mut buy_price = None;
    let mut status_lines = Vec::new();
    let mut product_links = Vec::new();

    for field in &embed.fields {
        let name_lower = field.name.to_lowercase();
        let text = format!("{} {}", field.name, field.value);

        if buy_price.is_none() && (name_lower.contains("price") || text.contains('£')) {
            buy_price = find_price(&text);
        }
        if name_lower.contains("status") || name_lower.contains("stock") {
            status_lines.push(format!("**{}:** {}", field.name, field.value));
        }
        if name_lower.contains("link") {
            let urls: Vec<String> = URL_RE
                .find_iter(&field.value)
                .map(|m| m.as_str().to_string())
                .collect();
            if !urls.is_empty() {
                product_links.extend(urls);
            } else if field.value.contains("http") {
                product_links.push(field.value.clone());
            }
        }
    }

    if buy_price.is_none() {
        buy_price = embed.description.as_deref().and_then(find_price);
    }

    Ok(ProductAlert {
        product_name,
        buy_price: buy_price.unwrap_or(0.0),
        status_lines,
        product_links,
        thumbnail_url: embed.thumbnail.as_ref().map(|t| t.url.clone()),
        image_url: embed.image.as_ref().map(|i| i.url.clone()),
        source: embed
            .author
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
    })
}
