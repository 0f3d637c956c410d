use std::time::Duration;

use serde_json::json;

use crate::models::{FirstPiece, Model, Nonconformity};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
const DESCRIPTION_LIMIT: usize = 300;

/// Posts short alerts to a Microsoft Teams incoming webhook. A notifier
/// without a URL does nothing.
#[derive(Clone)]
pub struct TeamsNotifier {
    webhook: Option<String>,
    client: reqwest::Client,
}

impl TeamsNotifier {
    pub fn new(webhook: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        TeamsNotifier { webhook, client }
    }

    pub fn disabled() -> Self {
        TeamsNotifier::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    /// Fire and forget; failures are only logged.
    pub fn send(&self, title: String, lines: Vec<String>) {
        let url = match &self.webhook {
            Some(url) => url.clone(),
            None => return,
        };
        let client = self.client.clone();
        let text = card_text(&title, &lines);
        actix_web::rt::spawn(async move {
            let result = client
                .post(&url)
                .json(&json!({ "text": text }))
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            match result {
                Ok(_) => tracing::debug!(%title, "teams notification sent"),
                Err(e) => tracing::warn!(%title, error = %e, "teams notification failed"),
            }
        });
    }
}

pub fn card_text(title: &str, lines: &[String]) -> String {
    format!("**{}**\n{}", title, lines.join("\n"))
}

pub fn first_piece_ng(model: &Model, fp: &FirstPiece) -> (String, Vec<String>) {
    let notes = if fp.review_notes.is_empty() {
        "-"
    } else {
        fp.review_notes.as_str()
    };
    (
        format!("FPA NG — {} / {}", model.model_root, model.model_version),
        vec![
            format!("MO: {}", fp.mo),
            format!("SN: {}", fp.sn),
            format!("Reporter: {}", fp.reporter),
            format!("Notes: {}", notes),
        ],
    )
}

pub fn nonconformity_recorded(model: &Model, nc: &Nonconformity) -> (String, Vec<String>) {
    (
        format!(
            "NC {} — {} / {}",
            nc.severity, model.model_root, model.model_version
        ),
        vec![
            format!("MO: {}", nc.mo),
            format!("Station: {} | Line: {}", nc.work_station, nc.line),
            format!(
                "Qty: {}/{} (Lot {})",
                qty(nc.defective_qty),
                qty(nc.inspection_qty),
                qty(nc.lot_qty)
            ),
            format!("Reporter: {}", nc.reporter),
            format!("Desc: {}", clip(&nc.description, DESCRIPTION_LIMIT)),
        ],
    )
}

/// Quantities always show a decimal part: `2.0`, `2.5`.
fn qty(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut clipped: String = text.chars().take(limit).collect();
        clipped.push('…');
        clipped
    } else {
        text.to_string()
    }
}
