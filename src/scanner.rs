use std::sync::atomic::{AtomicU64, Ordering};

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::config::{ListingSelectors, SelectorConfig};
use crate::error::Result;
use crate::session::Session;

/// Monotonic id stamped on every listings fetch. A token and a candidate
/// may only be paired for a claim when their fetch ids match.
static FETCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_fetch_id() -> u64 {
    FETCH_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Page-level anti-forgery token, scoped to a single listings fetch.
#[derive(Debug, Clone)]
pub struct PageToken {
    value: String,
    fetch_id: u64,
}

impl PageToken {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn fetch_id(&self) -> u64 {
        self.fetch_id
    }
}

/// One qualifying ride as extracted from the listings page. Single-tick
/// value; never cached across polls.
#[derive(Debug, Clone)]
pub struct RideCandidate {
    pub price: f64,
    /// Claim action href; the ride id is its last path segment.
    pub claim_reference: String,
    pub itinerary: String,
    pub departure: String,
    pub arrival: String,
    pub trips: String,
    pub ride_type: String,
    fetch_id: u64,
}

impl RideCandidate {
    pub fn fetch_id(&self) -> u64 {
        self.fetch_id
    }
}

/// A scan result: the first qualifying candidate paired with the page
/// token from the same fetch.
#[derive(Debug, Clone)]
pub struct ScanHit {
    pub token: PageToken,
    pub candidate: RideCandidate,
}

/// Fetch the listings page and return the first entry, in document order,
/// whose normalized price is at or above `min_price`.
///
/// `Ok(None)` when nothing qualifies. Malformed entries are skipped, never
/// fatal; only transport problems error out.
pub async fn scan(
    session: &Session,
    min_price: f64,
    selectors: &SelectorConfig,
) -> Result<Option<ScanHit>> {
    let body = session.fetch_listings().await?;
    Ok(extract_first_qualifying(&body, min_price, selectors))
}

fn extract_first_qualifying(
    body: &str,
    min_price: f64,
    selectors: &SelectorConfig,
) -> Option<ScanHit> {
    let entry_sel = parse_locator(&selectors.listing.entry)?;
    let price_sel = parse_locator(&selectors.listing.price)?;
    let link_sel = parse_locator(&selectors.listing.claim_link)?;
    let csrf_sel = parse_locator(&selectors.csrf_meta)?;

    let document = Html::parse_document(body);

    let Some(token_value) = document
        .select(&csrf_sel)
        .next()
        .and_then(|meta| meta.value().attr("content"))
    else {
        warn!("listings page has no anti-forgery meta token; cannot claim");
        return None;
    };

    let fetch_id = next_fetch_id();

    for entry in document.select(&entry_sel) {
        let Some(price_text) = entry.select(&price_sel).next() else {
            continue; // not a priced entry
        };
        let raw = text_of(price_text);
        let Some(price) = normalize_price(&raw) else {
            debug!("skipping entry with unparseable price {raw:?}");
            continue;
        };
        if price < min_price {
            continue;
        }

        let Some(claim_reference) = entry
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            warn!("entry priced {price} has no claim link; skipping");
            continue;
        };

        let candidate = RideCandidate {
            price,
            claim_reference: claim_reference.to_owned(),
            itinerary: field_text(entry, &selectors.listing, |l| &l.itinerary),
            departure: field_text(entry, &selectors.listing, |l| &l.departure),
            arrival: field_text(entry, &selectors.listing, |l| &l.arrival),
            trips: field_text(entry, &selectors.listing, |l| &l.trips),
            ride_type: field_text(entry, &selectors.listing, |l| &l.ride_type),
            fetch_id,
        };
        info!(
            "ride found: {price}\u{20ac} {} ({})",
            candidate.itinerary, candidate.claim_reference
        );
        return Some(ScanHit {
            token: PageToken {
                value: token_value.to_owned(),
                fetch_id,
            },
            candidate,
        });
    }

    None
}

fn parse_locator(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("invalid selector {css:?}: {e}");
            None
        }
    }
}

/// First match's trimmed text for one display field, empty when absent.
fn field_text<'a>(
    entry: ElementRef<'_>,
    listing: &'a ListingSelectors,
    pick: impl Fn(&'a ListingSelectors) -> &'a String,
) -> String {
    let Some(selector) = parse_locator(pick(listing)) else {
        return String::new();
    };
    entry
        .select(&selector)
        .next()
        .map(|el| text_of(el))
        .unwrap_or_default()
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

/// Normalize a price label to a number: comma accepted as the decimal
/// separator, currency suffix and whitespace dropped.
pub fn normalize_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}
