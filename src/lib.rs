pub mod analyzer;
pub mod config;
pub mod discord;
pub mod error;
pub mod extract;
pub mod formatter;
pub mod gateway;
pub mod reporter;
pub mod sampler;
pub mod types;
pub mod watcher;

/// eBay Finding API endpoint (completed/sold item search).
pub const EBAY_FINDING_API: &str = "https://svcs.ebay.com/services/search/FindingService/v1";

/// Public eBay UK search page; sold/completed filters are appended as query params.
pub const EBAY_SOLD_SEARCH_URL: &str = "https://www.ebay.co.uk/sch/i.html";

/// Discord REST API base URL (v10).
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord gateway WebSocket URL (v10, JSON encoding).
pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Currency symbol used by inbound alerts and outbound formatting.
pub const CURRENCY_SYMBOL: &str = "£";
