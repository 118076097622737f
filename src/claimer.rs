use std::path::Path;

use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::ConfirmationSelectors;
use crate::error::{Result, WatchError};
use crate::scanner::ScanHit;
use crate::session::Session;

/// Placeholder substituted for confirmation fields the claim response did
/// not carry. The claim itself still counts as successful.
pub const FIELD_UNAVAILABLE: &str = "unavailable";

/// Confirmation details extracted from a successful claim response, plus
/// the claimed entry's trip count and type carried over from the listings
/// page (the confirmation page does not repeat them). Consumed once to
/// build the operator notification, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimResult {
    pub price: String,
    pub address: String,
    pub departure: String,
    pub arrival: String,
    pub trips: String,
    pub ride_type: String,
}

impl ClaimResult {
    /// True when every confirmation-page field was actually found.
    pub fn confirmed(&self) -> bool {
        [&self.price, &self.address, &self.departure, &self.arrival]
            .iter()
            .all(|f| *f != FIELD_UNAVAILABLE)
    }
}

/// Submit the claim for the hit's candidate, authorized by the page token
/// from the same listings fetch.
///
/// A transport failure here is fatal for the outer cycle (the session may
/// be invalid). A response without the expected confirmation fields is
/// not: the claim happened, so the fields degrade to placeholders.
pub async fn claim(
    session: &Session,
    hit: &ScanHit,
    confirmation: &ConfirmationSelectors,
    audit_dir: &Path,
) -> Result<ClaimResult> {
    if hit.token.fetch_id() != hit.candidate.fetch_id() {
        return Err(WatchError::StaleToken);
    }

    let ride_id = ride_id_of(&hit.candidate.claim_reference).ok_or_else(|| {
        WatchError::Transport {
            action: "claim submit",
            detail: format!("empty claim reference {:?}", hit.candidate.claim_reference),
        }
    })?;

    info!(
        "claiming ride {ride_id} ({}\u{20ac}, {})",
        hit.candidate.price, hit.candidate.itinerary
    );
    let body = session.submit_claim(ride_id, hit.token.value()).await?;
    info!("ride {ride_id} claimed");

    persist_audit_artifact(audit_dir, &body);

    let mut result = extract_confirmation(&body, confirmation);
    result.trips = hit.candidate.trips.clone();
    result.ride_type = hit.candidate.ride_type.clone();
    Ok(result)
}

/// Ride id = last non-empty path segment of the claim reference.
fn ride_id_of(claim_reference: &str) -> Option<&str> {
    claim_reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

fn extract_confirmation(body: &str, selectors: &ConfirmationSelectors) -> ClaimResult {
    let document = Html::parse_document(body);
    ClaimResult {
        price: confirmation_field(&document, &selectors.price),
        address: confirmation_field(&document, &selectors.address),
        departure: confirmation_field(&document, &selectors.departure),
        arrival: confirmation_field(&document, &selectors.arrival),
        trips: String::new(),
        ride_type: String::new(),
    }
}

fn confirmation_field(document: &Html, css: &str) -> String {
    let Ok(selector) = Selector::parse(css) else {
        warn!("invalid confirmation selector {css:?}");
        return FIELD_UNAVAILABLE.into();
    };
    match document.select(&selector).next() {
        Some(el) => {
            let text = el.text().collect::<String>().trim().to_owned();
            if text.is_empty() {
                FIELD_UNAVAILABLE.into()
            } else {
                text
            }
        }
        None => FIELD_UNAVAILABLE.into(),
    }
}

/// Keep the raw claim response for manual inspection. Best-effort: a write
/// failure is logged and the claim still succeeds.
fn persist_audit_artifact(audit_dir: &Path, body: &str) {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = audit_dir.join(format!("claim_{stamp}.html"));
    let write = std::fs::create_dir_all(audit_dir).and_then(|()| std::fs::write(&path, body));
    match write {
        Ok(()) => info!("claim response saved to {}", path.display()),
        Err(e) => warn!("failed to save claim response to {}: {e}", path.display()),
    }
}
