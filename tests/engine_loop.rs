//! Control-loop behavior: idle, backoff/re-login, single claim with a
//! single notification, and settings responsiveness.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ridewatch::config::{AppConfig, Credentials, SelectorConfig, TelegramConfig};
use ridewatch::engine::Engine;
use ridewatch::notify::Notifier;
use ridewatch::settings::{Settings, SettingsSource};

// =============================================================================
// Test helpers
// =============================================================================

/// Shared in-memory settings the test can mutate while the engine runs.
#[derive(Clone)]
struct MemorySettings(Arc<Mutex<Settings>>);

impl MemorySettings {
    fn new(settings: Settings) -> Self {
        Self(Arc::new(Mutex::new(settings)))
    }

    fn set(&self, settings: Settings) {
        *self.0.lock().expect("settings lock") = settings;
    }
}

impl SettingsSource for MemorySettings {
    fn current(&self) -> Settings {
        *self.0.lock().expect("settings lock")
    }
}

/// Reports a long interval for the first tick's top-of-tick read, then a
/// short one, proving the sleep re-reads the interval.
struct SwitchingInterval {
    calls: AtomicU32,
}

impl SettingsSource for SwitchingInterval {
    fn current(&self) -> Settings {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        Settings {
            monitoring: true,
            price: 9999.0,
            // Calls 0 and 1 are the outer and top-of-tick reads; call 2 is
            // the pre-sleep read.
            interval: if call < 2 { 600.0 } else { 0.02 },
        }
    }
}

fn test_selectors() -> SelectorConfig {
    let mut selectors = SelectorConfig::default();
    selectors.listing.entry = ".ride".into();
    selectors.listing.price = ".price".into();
    selectors.listing.claim_link = "a.claim".into();
    selectors.listing.itinerary = ".route".into();
    selectors.listing.departure = ".dep".into();
    selectors.listing.arrival = ".arr".into();
    selectors.listing.trips = ".trips".into();
    selectors.listing.ride_type = ".type".into();
    selectors.confirmation.price = ".price".into();
    selectors.confirmation.address = ".route".into();
    selectors.confirmation.departure = ".dep".into();
    selectors.confirmation.arrival = ".arr".into();
    selectors
}

fn app_config(server: &MockServer, audit_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.portal.base_url = server.uri();
    config.portal.logged_in_marker = "Sign out".into();
    config.watch.idle_poll_secs = 0.02;
    config.watch.cooldown_secs = 0.05;
    config.watch.audit_dir = audit_dir.to_string_lossy().into_owned();
    config.selectors = test_selectors();
    config
}

fn credentials() -> Credentials {
    Credentials {
        email: "driver@example.com".into(),
        password: "hunter2".into(),
    }
}

fn telegram_for(server: &MockServer) -> TelegramConfig {
    TelegramConfig {
        bot_token: "t".into(),
        chat_id: "c".into(),
        api_base: server.uri(),
    }
}

const LOGIN_PAGE: &str = r#"
    <form class="simple_form">
        <input type="hidden" name="authenticity_token" value="tok-1" />
    </form>
"#;

async fn mount_login_success(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/sign_in"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/sign_in"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<a>Sign out</a>"))
        .mount(server)
        .await;
}

fn empty_listings() -> String {
    r#"<html><head><meta name="csrf-token" content="csrf-a"></head><body></body></html>"#.into()
}

fn qualifying_listings(id: u32) -> String {
    format!(
        r#"<html><head><meta name="csrf-token" content="csrf-a"></head><body>
           <div class="ride">
             <span class="price">42,00€</span>
             <div class="route">Paris - Lyon</div>
             <div class="dep">08:00</div>
             <div class="arr">12:00</div>
             <div class="trips">2</div>
             <div class="type">Standard</div>
             <a class="claim" href="/d/rides/{id}">Accepter</a>
           </div>
           </body></html>"#
    )
}

async fn run_engine_for<S>(
    config: &AppConfig,
    settings: S,
    notifier: Notifier,
    duration: Duration,
) where
    S: SettingsSource + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::new(config, credentials(), settings, notifier, shutdown_rx);
    let handle = tokio::spawn(engine.run());
    tokio::time::sleep(duration).await;
    shutdown_tx.send(true).expect("engine listening");
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine stops on shutdown")
        .expect("engine task completes");
}

async fn portal_requests(server: &MockServer, method_name: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .expect("recording enabled")
        .iter()
        .filter(|r| r.method.to_string() == method_name && r.url.path() == url_path)
        .count()
}

// =============================================================================
// Loop behavior
// =============================================================================

#[tokio::test]
async fn monitoring_off_performs_zero_network_requests() {
    let server = MockServer::start().await;
    let audit = tempfile::tempdir().expect("tempdir");
    let config = app_config(&server, audit.path());
    let settings = MemorySettings::new(Settings {
        monitoring: false,
        price: 20.0,
        interval: 0.02,
    });

    run_engine_for(&config, settings, Notifier::new(None), Duration::from_millis(250)).await;

    let requests = server.received_requests().await.expect("recording enabled");
    assert!(requests.is_empty(), "idle loop must stay off the network");
}

#[tokio::test]
async fn listings_failure_backs_off_then_logs_in_again() {
    let server = MockServer::start().await;
    mount_login_success(&server).await;
    Mock::given(method("GET"))
        .and(path("/d/rides"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let audit = tempfile::tempdir().expect("tempdir");
    let config = app_config(&server, audit.path());
    let settings = MemorySettings::new(Settings {
        monitoring: true,
        price: 20.0,
        interval: 0.02,
    });

    run_engine_for(&config, settings, Notifier::new(None), Duration::from_millis(700)).await;

    // Each failed cycle re-fetches the login page after the cooldown.
    let logins = portal_requests(&server, "GET", "/users/sign_in").await;
    assert!(logins >= 2, "expected repeated login attempts, saw {logins}");
}

#[tokio::test]
async fn one_claim_and_one_notification_per_detected_candidate() {
    let portal = MockServer::start().await;
    let telegram = MockServer::start().await;
    mount_login_success(&portal).await;
    // The qualifying ride appears exactly once; it is gone on re-poll.
    Mock::given(method("GET"))
        .and(path("/d/rides"))
        .respond_with(ResponseTemplate::new(200).set_body_string(qualifying_listings(5)))
        .up_to_n_times(1)
        .mount(&portal)
        .await;
    Mock::given(method("GET"))
        .and(path("/d/rides"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listings()))
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/d/rides/5"))
        .and(body_string_contains("_method=put"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<div class="price">42,00€</div><div class="route">12 Rue Exemple</div>"#,
        ))
        .expect(1)
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/bott/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .expect(1)
        .mount(&telegram)
        .await;

    let audit = tempfile::tempdir().expect("tempdir");
    let config = app_config(&portal, audit.path());
    let settings = MemorySettings::new(Settings {
        monitoring: true,
        price: 20.0,
        interval: 0.02,
    });
    let notifier = Notifier::new(Some(telegram_for(&telegram)));

    run_engine_for(&config, settings, notifier, Duration::from_millis(500)).await;

    assert_eq!(portal_requests(&portal, "POST", "/d/rides/5").await, 1);
    let notifications = telegram
        .received_requests()
        .await
        .expect("recording enabled")
        .len();
    assert_eq!(notifications, 1);
    // The message body carried the confirmed fields.
    let request = &telegram.received_requests().await.expect("recording enabled")[0];
    let body = String::from_utf8_lossy(&request.body).into_owned();
    assert!(body.contains("42,00"));
    assert!(body.contains("12 Rue Exemple"));
    assert!(body.contains("Trips: 2"));
    assert!(body.contains("Type: Standard"));
}

#[tokio::test]
async fn interval_change_applies_to_the_very_next_sleep() {
    let server = MockServer::start().await;
    mount_login_success(&server).await;
    Mock::given(method("GET"))
        .and(path("/d/rides"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listings()))
        .mount(&server)
        .await;
    let audit = tempfile::tempdir().expect("tempdir");
    let config = app_config(&server, audit.path());
    let settings = SwitchingInterval {
        calls: AtomicU32::new(0),
    };

    run_engine_for(&config, settings, Notifier::new(None), Duration::from_secs(1)).await;

    // Had the 600 s interval from the top-of-tick read governed the first
    // sleep, a single scan would have happened.
    let scans = portal_requests(&server, "GET", "/d/rides").await;
    assert!(scans >= 3, "expected fast re-polling, saw {scans} scans");
}

#[tokio::test]
async fn disabling_monitoring_mid_loop_stops_polling() {
    let server = MockServer::start().await;
    mount_login_success(&server).await;
    Mock::given(method("GET"))
        .and(path("/d/rides"))
        .respond_with(ResponseTemplate::new(200).set_body_string(empty_listings()))
        .mount(&server)
        .await;
    let audit = tempfile::tempdir().expect("tempdir");
    let config = app_config(&server, audit.path());
    let settings = MemorySettings::new(Settings {
        monitoring: true,
        price: 20.0,
        interval: 0.02,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::new(
        &config,
        credentials(),
        settings.clone(),
        Notifier::new(None),
        shutdown_rx,
    );
    let handle = tokio::spawn(engine.run());

    tokio::time::sleep(Duration::from_millis(200)).await;
    settings.set(Settings {
        monitoring: false,
        price: 20.0,
        interval: 0.02,
    });
    // Give the loop a tick to observe the flag, then the count must hold.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let scans_at_disable = portal_requests(&server, "GET", "/d/rides").await;
    assert!(scans_at_disable >= 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let scans_after_wait = portal_requests(&server, "GET", "/d/rides").await;
    assert_eq!(scans_at_disable, scans_after_wait);

    shutdown_tx.send(true).expect("engine listening");
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine stops on shutdown")
        .expect("engine task completes");
}

#[tokio::test]
async fn repeated_login_failures_alert_the_operator_once_per_streak() {
    let portal = MockServer::start().await;
    let telegram = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/sign_in"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/bott/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"ok\":true}"))
        .expect(1)
        .mount(&telegram)
        .await;

    let audit = tempfile::tempdir().expect("tempdir");
    let mut config = app_config(&portal, audit.path());
    config.watch.cooldown_secs = 0.02;
    config.watch.login_alert_threshold = 2;
    let settings = MemorySettings::new(Settings {
        monitoring: true,
        price: 20.0,
        interval: 0.02,
    });
    let notifier = Notifier::new(Some(telegram_for(&telegram)));

    run_engine_for(&config, settings, notifier, Duration::from_millis(500)).await;

    let failures = portal_requests(&portal, "GET", "/users/sign_in").await;
    assert!(failures > 2, "expected more than two login attempts, saw {failures}");
    let alerts = telegram
        .received_requests()
        .await
        .expect("recording enabled")
        .len();
    assert_eq!(alerts, 1, "alert fires once when the streak hits the threshold");
}
