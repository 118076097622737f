use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::claimer;
use crate::config::{AppConfig, BackoffStrategy, Credentials, PortalConfig, SelectorConfig};
use crate::error::WatchError;
use crate::notify::{self, Notifier};
use crate::scanner;
use crate::session::Session;
use crate::settings::SettingsSource;

/// Control loop phases. Transitions are logged; the loop has no terminal
/// phase and runs until the shutdown channel flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Monitoring disabled; no network activity.
    Idle,
    Authenticating,
    Polling,
    Claiming,
    BackingOff,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Authenticating => "authenticating",
            Phase::Polling => "polling",
            Phase::Claiming => "claiming",
            Phase::BackingOff => "backing-off",
        }
    }
}

/// Cooldown schedule between failed outer cycles. The reference cadence is
/// a fixed delay with no growth; exponential is opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based consecutive failure
    /// count).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(cooldown) => cooldown,
            BackoffPolicy::Exponential { base, max } => {
                let doublings = attempt.saturating_sub(1).min(16);
                let delay = base.saturating_mul(1u32 << doublings);
                delay.min(max)
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_secs(100))
    }
}

/// Config-file seconds to a `Duration`. Negative values clamp to zero;
/// values a `Duration` cannot hold (overflow, NaN) fall back with a
/// warning instead of panicking the daemon at construction.
fn secs_or(value: f64, fallback: Duration) -> Duration {
    match Duration::try_from_secs_f64(value.max(0.0)) {
        Ok(duration) => duration,
        Err(_) => {
            warn!(
                "duration {value}s is out of range — using {:.1}s",
                fallback.as_secs_f64()
            );
            fallback
        }
    }
}

/// Reason an inner polling loop handed control back to the outer cycle.
enum CycleEnd {
    MonitoringOff,
    Shutdown,
    Errored(WatchError),
}

/// The authenticate → poll → detect → claim control loop.
///
/// Single logical worker: one session, one poll, one claim at a time.
/// Settings are re-read every tick; the session lives for one outer cycle.
pub struct Engine<S: SettingsSource> {
    portal: PortalConfig,
    selectors: SelectorConfig,
    credentials: Credentials,
    settings: S,
    notifier: Notifier,
    policy: BackoffPolicy,
    idle_poll: Duration,
    audit_dir: PathBuf,
    login_alert_threshold: u32,
    shutdown: watch::Receiver<bool>,
    phase: Phase,
    consecutive_failures: u32,
    login_failures: u32,
}

impl<S: SettingsSource> Engine<S> {
    pub fn new(
        config: &AppConfig,
        credentials: Credentials,
        settings: S,
        notifier: Notifier,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let cooldown = secs_or(config.watch.cooldown_secs, Duration::from_secs(100));
        let policy = match config.watch.backoff {
            BackoffStrategy::Fixed => BackoffPolicy::Fixed(cooldown),
            BackoffStrategy::Exponential => BackoffPolicy::Exponential {
                base: cooldown,
                max: secs_or(config.watch.backoff_cap_secs, Duration::from_secs(3200)),
            },
        };
        Self {
            portal: config.portal.clone(),
            selectors: config.selectors.clone(),
            credentials,
            settings,
            notifier,
            policy,
            idle_poll: secs_or(config.watch.idle_poll_secs, Duration::from_secs(1)),
            audit_dir: PathBuf::from(&config.watch.audit_dir),
            login_alert_threshold: config.watch.login_alert_threshold,
            shutdown,
            phase: Phase::Idle,
            consecutive_failures: 0,
            login_failures: 0,
        }
    }

    /// Run until shutdown. Outer cycle: read settings, log in, hand off to
    /// the inner polling loop; any escaped error lands in backoff and the
    /// cycle restarts from a fresh settings read.
    pub async fn run(mut self) {
        info!("watcher started");
        loop {
            if self.stopped() {
                info!("watcher stopped");
                return;
            }

            let settings = self.settings.current();
            if !settings.monitoring {
                self.enter(Phase::Idle);
                self.sleep(self.idle_poll).await;
                continue;
            }

            self.enter(Phase::Authenticating);
            match Session::login(&self.portal, &self.selectors, &self.credentials).await {
                Ok(session) => {
                    self.login_failures = 0;
                    info!(
                        "watching for rides priced >= {}\u{20ac} every {}s",
                        settings.price, settings.interval
                    );
                    match self.poll_until_cycle_end(&session).await {
                        CycleEnd::MonitoringOff => {
                            info!("monitoring disabled; dropping session");
                        }
                        CycleEnd::Shutdown => {}
                        CycleEnd::Errored(e) => {
                            warn!("cycle aborted: {e}");
                            self.back_off().await;
                        }
                    }
                }
                Err(e) => {
                    warn!("login failed: {e}");
                    self.login_failures += 1;
                    if self.login_failures == self.login_alert_threshold {
                        self.notifier
                            .send(&notify::login_failure_message(self.login_failures))
                            .await;
                    }
                    self.back_off().await;
                }
            }
        }
    }

    /// Inner loop: one tick = settings check, scan, claim-if-hit, sleep.
    /// Monitoring flag and shutdown are checked at the top of every tick.
    async fn poll_until_cycle_end(&mut self, session: &Session) -> CycleEnd {
        self.enter(Phase::Polling);
        loop {
            if self.stopped() {
                return CycleEnd::Shutdown;
            }
            let settings = self.settings.current();
            if !settings.monitoring {
                return CycleEnd::MonitoringOff;
            }

            match scanner::scan(session, settings.price, &self.selectors).await {
                Ok(Some(hit)) => {
                    self.consecutive_failures = 0;
                    self.enter(Phase::Claiming);
                    match claimer::claim(
                        session,
                        &hit,
                        &self.selectors.confirmation,
                        &self.audit_dir,
                    )
                    .await
                    {
                        Ok(result) => {
                            self.notifier.send(&notify::claim_message(&result)).await;
                            self.enter(Phase::Polling);
                        }
                        Err(e) => return CycleEnd::Errored(e),
                    }
                }
                Ok(None) => {
                    self.consecutive_failures = 0;
                    debug!("no qualifying ride");
                }
                Err(e) => return CycleEnd::Errored(e),
            }

            // Interval is re-read right before sleeping so an operator
            // change applies to this very sleep, not the next one.
            let interval = self.settings.current().interval_duration();
            self.sleep(interval).await;
        }
    }

    async fn back_off(&mut self) {
        self.enter(Phase::BackingOff);
        self.consecutive_failures += 1;
        let delay = self.policy.delay(self.consecutive_failures);
        info!(
            "cooling down for {:.1}s (failure #{})",
            delay.as_secs_f64(),
            self.consecutive_failures
        );
        self.sleep(delay).await;
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("phase: {} -> {}", self.phase.label(), phase.label());
            self.phase = phase;
        }
    }

    fn stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep that wakes early on shutdown.
    async fn sleep(&mut self, duration: Duration) {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }
}
