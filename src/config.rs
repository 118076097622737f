use std::path::Path;

use anyhow::{Context, Result};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
///
/// Every table has defaults matching the reference portal, so a missing
/// file or an empty table is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// Portal endpoints and the identifying header set the portal expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal base URL; origin/referer headers are derived from it.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_listings_path")]
    pub listings_path: String,
    /// Simulated browser identity.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept")]
    pub accept: String,
    /// Marker string whose presence in a response body proves an
    /// authenticated state.
    #[serde(default = "default_logged_in_marker")]
    pub logged_in_marker: String,
}

impl PortalConfig {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }

    pub fn listings_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.listings_path
        )
    }

    pub fn claim_url(&self, ride_id: &str) -> String {
        format!("{}/{}", self.listings_url(), ride_id)
    }

    /// Origin header value (scheme + host + port) derived from the base URL.
    pub fn origin(&self) -> Result<String> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid portal base_url {:?}", self.base_url))?;
        Ok(url.origin().ascii_serialization())
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            listings_path: default_listings_path(),
            user_agent: default_user_agent(),
            accept: default_accept(),
            logged_in_marker: default_logged_in_marker(),
        }
    }
}

fn default_base_url() -> String {
    "https://app.brikks.co".into()
}

fn default_login_path() -> String {
    "/users/sign_in".into()
}

fn default_listings_path() -> String {
    "/d/rides".into()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/135.0.0.0 Safari/537.36 Edg/135.0.0.0"
        .into()
}

fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".into()
}

fn default_logged_in_marker() -> String {
    "Se déconnecter".into()
}

/// Watcher tuning: file locations, idle cadence, backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Path of the mutable runtime settings file, re-read every tick.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
    /// Directory for raw claim-response audit artifacts.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,
    /// Sleep while monitoring is disabled.
    #[serde(default = "default_idle_poll_secs")]
    pub idle_poll_secs: f64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Cooldown after a failed outer cycle (base delay for exponential).
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Upper bound on the exponential backoff delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: f64,
    /// Consecutive login failures before the operator is alerted.
    #[serde(default = "default_login_alert_threshold")]
    pub login_alert_threshold: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            audit_dir: default_audit_dir(),
            idle_poll_secs: default_idle_poll_secs(),
            backoff: BackoffStrategy::default(),
            cooldown_secs: default_cooldown_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            login_alert_threshold: default_login_alert_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Fixed cooldown between failed cycles (reference behavior).
    #[default]
    Fixed,
    /// Doubling delay, capped at `backoff_cap_secs`.
    Exponential,
}

fn default_settings_path() -> String {
    "settings.json".into()
}

fn default_audit_dir() -> String {
    "logs".into()
}

fn default_idle_poll_secs() -> f64 {
    1.0
}

fn default_cooldown_secs() -> f64 {
    100.0
}

fn default_backoff_cap_secs() -> f64 {
    3200.0
}

fn default_login_alert_threshold() -> u32 {
    3
}

/// Declarative field-extraction mapping: field name → CSS locator.
///
/// Only this table is environment-specific; the scanner and claimer walk
/// whatever shape these selectors describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub listing: ListingSelectors,
    #[serde(default)]
    pub confirmation: ConfirmationSelectors,
    /// Page-level anti-forgery token on the listings page.
    #[serde(default = "default_csrf_meta")]
    pub csrf_meta: String,
    /// Hidden anti-forgery input in the login form.
    #[serde(default = "default_login_token_input")]
    pub login_token_input: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            listing: ListingSelectors::default(),
            confirmation: ConfirmationSelectors::default(),
            csrf_meta: default_csrf_meta(),
            login_token_input: default_login_token_input(),
        }
    }
}

fn default_csrf_meta() -> String {
    r#"meta[name="csrf-token"]"#.into()
}

fn default_login_token_input() -> String {
    r#"input[name="authenticity_token"]"#.into()
}

/// Locators for one listings-page entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// One listing entry (wraps all the field locators below).
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default = "default_price")]
    pub price: String,
    /// Anchor whose href is the claim action reference.
    #[serde(default = "default_claim_link")]
    pub claim_link: String,
    #[serde(default = "default_itinerary")]
    pub itinerary: String,
    #[serde(default = "default_departure")]
    pub departure: String,
    #[serde(default = "default_arrival")]
    pub arrival: String,
    #[serde(default = "default_trips")]
    pub trips: String,
    #[serde(default = "default_ride_type")]
    pub ride_type: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            price: default_price(),
            claim_link: default_claim_link(),
            itinerary: default_itinerary(),
            departure: default_departure(),
            arrival: default_arrival(),
            trips: default_trips(),
            ride_type: default_ride_type(),
        }
    }
}

fn default_entry() -> String {
    ".panel-default".into()
}

fn default_price() -> String {
    ".label-price".into()
}

fn default_claim_link() -> String {
    "a.btn-block".into()
}

fn default_itinerary() -> String {
    ".col-md-7".into()
}

fn default_departure() -> String {
    ".col-md-1:nth-child(1) .row:nth-child(2)".into()
}

fn default_arrival() -> String {
    ".col-md-1:nth-child(4) .row:nth-child(2)".into()
}

fn default_trips() -> String {
    ".col-md-1:nth-child(2)".into()
}

fn default_ride_type() -> String {
    ".col-md-1:nth-child(3)".into()
}

/// Locators for the claim confirmation page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationSelectors {
    #[serde(default = "default_price")]
    pub price: String,
    #[serde(default = "default_itinerary")]
    pub address: String,
    #[serde(default = "default_departure")]
    pub departure: String,
    #[serde(default = "default_arrival")]
    pub arrival: String,
}

impl Default for ConfirmationSelectors {
    fn default() -> Self {
        Self {
            price: default_price(),
            address: default_itinerary(),
            departure: default_departure(),
            arrival: default_arrival(),
        }
    }
}

impl SelectorConfig {
    /// Check that every configured locator compiles, so a typo surfaces
    /// at startup instead of as silently empty scans.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("csrf_meta", &self.csrf_meta),
            ("login_token_input", &self.login_token_input),
            ("listing.entry", &self.listing.entry),
            ("listing.price", &self.listing.price),
            ("listing.claim_link", &self.listing.claim_link),
            ("listing.itinerary", &self.listing.itinerary),
            ("listing.departure", &self.listing.departure),
            ("listing.arrival", &self.listing.arrival),
            ("listing.trips", &self.listing.trips),
            ("listing.ride_type", &self.listing.ride_type),
            ("confirmation.price", &self.confirmation.price),
            ("confirmation.address", &self.confirmation.address),
            ("confirmation.departure", &self.confirmation.departure),
            ("confirmation.arrival", &self.confirmation.arrival),
        ];
        for (name, css) in named {
            Selector::parse(css)
                .map_err(|e| anyhow::anyhow!("invalid selector {name} = {css:?}: {e}"))?;
        }
        Ok(())
    }
}

/// Operator credentials, supplied once at process start via environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            email: std::env::var("EMAIL").context("EMAIL not set")?,
            password: std::env::var("PASSWORD").context("PASSWORD not set")?,
        })
    }
}

/// Telegram notification destination + transport credentials.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl TelegramConfig {
    /// `None` when no bot token is configured — notifications disabled.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("CHAT_ID").ok()?;
        Some(Self {
            bot_token,
            chat_id,
            api_base: crate::TELEGRAM_API_BASE.into(),
        })
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.selectors.validate()?;
        config.portal.origin()?;
        Ok(config)
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
