use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout_secs: u64,
    pub notifier_webhook_url: Option<String>,
    pub notifications_enabled: bool,
    pub idempotency_window_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            database_acquire_timeout_secs: env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            notifier_webhook_url: env::var("NOTIFIER_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            notifications_enabled: env::var("NOTIFICATIONS_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            idempotency_window_secs: env::var("IDEMPOTENCY_WINDOW_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(86400),
        })
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
