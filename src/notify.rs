use serde_json::json;
use tracing::{debug, warn};

use crate::claimer::ClaimResult;
use crate::config::TelegramConfig;

/// Best-effort operator notification channel. Delivery failures are
/// logged and swallowed; the control loop never sees them.
pub struct Notifier {
    client: reqwest::Client,
    telegram: Option<TelegramConfig>,
}

impl Notifier {
    /// `None` disables delivery entirely (messages are dropped with a
    /// debug log).
    pub fn new(telegram: Option<TelegramConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            telegram,
        }
    }

    pub async fn send(&self, text: &str) {
        let Some(telegram) = &self.telegram else {
            debug!("notifications disabled; dropping message");
            return;
        };
        let url = format!(
            "{}/bot{}/sendMessage",
            telegram.api_base.trim_end_matches('/'),
            telegram.bot_token
        );
        let body = json!({
            "chat_id": telegram.chat_id,
            "text": text,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("notification rejected with status {}", response.status());
            }
            Ok(_) => debug!("notification delivered"),
            Err(e) => warn!("notification delivery failed: {e}"),
        }
    }
}

/// Fixed-format message for a successful claim.
pub fn claim_message(result: &ClaimResult) -> String {
    format!(
        "\u{2705} Ride claimed\nPrice: {}\nAddress: {}\nDeparture: {}\nArrival: {}\nTrips: {}\nType: {}",
        result.price, result.address, result.departure, result.arrival, result.trips, result.ride_type
    )
}

/// Operator alert after a streak of failed login attempts.
pub fn login_failure_message(consecutive: u32) -> String {
    format!(
        "\u{274c} {consecutive} consecutive login failures; check credentials and portal status"
    )
}
