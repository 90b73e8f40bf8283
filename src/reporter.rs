use crate::types::AlertRecord;

/// Emit a processed alert as a single JSON line to stdout.
pub fn report_alert(record: &AlertRecord) {
    if let Ok(json) = serde_json::to_string(record) {
        println!("{json}");
    }
}
