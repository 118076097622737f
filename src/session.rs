use reqwest::header::{ACCEPT, ORIGIN, REFERER};
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::{Credentials, PortalConfig, SelectorConfig};
use crate::error::{Result, WatchError};

/// One authenticated portal session: a cookie-jar HTTP client plus the
/// portal config it was built against. Created once per outer cycle and
/// discarded whenever the cycle ends.
pub struct Session {
    client: reqwest::Client,
    portal: PortalConfig,
    origin: String,
}

impl Session {
    /// Perform the full login flow: fetch the login page, lift the
    /// anti-forgery token out of the form, submit credentials plus token.
    ///
    /// No internal retry — a failure here is the control loop's problem.
    pub async fn login(
        portal: &PortalConfig,
        selectors: &SelectorConfig,
        credentials: &Credentials,
    ) -> Result<Self> {
        let origin = portal
            .origin()
            .map_err(|e| WatchError::transport("login", e))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(&portal.user_agent)
            .build()
            .map_err(|e| WatchError::transport("login", e))?;

        let login_url = portal.login_url();
        debug!("fetching login page {login_url}");
        let response = client
            .get(&login_url)
            .header(ACCEPT, &portal.accept)
            .header(REFERER, &login_url)
            .send()
            .await
            .map_err(|e| WatchError::transport("login page fetch", e))?;
        if !response.status().is_success() {
            return Err(WatchError::status("login page fetch", response.status()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| WatchError::transport("login page fetch", e))?;

        let token = extract_login_token(&body, &selectors.login_token_input).ok_or_else(|| {
            WatchError::Authentication("login page lacks the anti-forgery field".into())
        })?;

        info!("submitting credentials for {}", credentials.email);
        let form = [
            ("utf8", "\u{2713}"),
            ("authenticity_token", token.as_str()),
            ("user[email]", credentials.email.as_str()),
            ("user[password]", credentials.password.as_str()),
            ("user[remember_me]", "1"),
            ("commit", "Connexion"),
        ];
        let response = client
            .post(&login_url)
            .header(ACCEPT, &portal.accept)
            .header(ORIGIN, &origin)
            .header(REFERER, &login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| WatchError::transport("login submit", e))?;
        if !response.status().is_success() {
            return Err(WatchError::status("login submit", response.status()));
        }

        // Authenticated if the portal redirected us away from the login
        // page, or the logged-in marker shows up in the body.
        let final_url = response.url().to_string();
        let redirected = final_url.trim_end_matches('/') != login_url.trim_end_matches('/');
        let body = response
            .text()
            .await
            .map_err(|e| WatchError::transport("login submit", e))?;
        if redirected || body.contains(&portal.logged_in_marker) {
            info!("login successful");
            Ok(Self {
                client,
                portal: portal.clone(),
                origin,
            })
        } else {
            Err(WatchError::Authentication("credentials rejected".into()))
        }
    }

    /// Fetch the listings page, returning its body.
    pub async fn fetch_listings(&self) -> Result<String> {
        let response = self
            .client
            .get(self.portal.listings_url())
            .header(ACCEPT, &self.portal.accept)
            .header(REFERER, self.portal.listings_url())
            .send()
            .await
            .map_err(|e| WatchError::transport("listings fetch", e))?;
        if !response.status().is_success() {
            return Err(WatchError::status("listings fetch", response.status()));
        }
        response
            .text()
            .await
            .map_err(|e| WatchError::transport("listings fetch", e))
    }

    /// Submit the claim action for one ride id, returning the response body.
    ///
    /// Rails-style `_method=put` override on a POST, authorized by the
    /// listings page token, with the listings page as referer.
    pub async fn submit_claim(&self, ride_id: &str, token: &str) -> Result<String> {
        let url = self.portal.claim_url(ride_id);
        let form = [("_method", "put"), ("authenticity_token", token)];
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, &self.portal.accept)
            .header(ORIGIN, &self.origin)
            .header(REFERER, self.portal.listings_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| WatchError::transport("claim submit", e))?;
        if !response.status().is_success() {
            return Err(WatchError::status("claim submit", response.status()));
        }
        response
            .text()
            .await
            .map_err(|e| WatchError::transport("claim submit", e))
    }
}

/// Pull the anti-forgery token value out of the login form.
fn extract_login_token(body: &str, locator: &str) -> Option<String> {
    let selector = Selector::parse(locator).ok()?;
    let document = Html::parse_document(body);
    let input = document.select(&selector).next()?;
    input.value().attr("value").map(str::to_owned)
}
