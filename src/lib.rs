pub mod claimer;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod scanner;
pub mod session;
pub mod settings;

/// Telegram Bot API base URL (overridable per notifier, mainly for tests).
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
