use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_service_key: String,
    pub internal_api_key: String,
    pub default_timezone: String,
    pub reminder_grace_minutes: i64,
    pub reminder_dispatch_timeout_seconds: u64,
    pub whatsapp_api_url: String,
    pub whatsapp_api_token: String,
    pub whatsapp_webhook_secret: String,
    pub calendar_api_url: String,
    pub calendar_api_token: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_URL not set, using empty value");
                    String::new()
                }),
            database_service_key: env::var("DATABASE_SERVICE_KEY")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_SERVICE_KEY not set, using empty value");
                    String::new()
                }),
            internal_api_key: env::var("INTERNAL_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("INTERNAL_API_KEY not set, using empty value");
                    String::new()
                }),
            default_timezone: env::var("DEFAULT_TIMEZONE")
                .unwrap_or_else(|_| "America/Mexico_City".to_string()),
            reminder_grace_minutes: parse_env_number("REMINDER_GRACE_MINUTES", 360),
            reminder_dispatch_timeout_seconds: parse_env_number(
                "REMINDER_DISPATCH_TIMEOUT_SECONDS",
                30,
            ),
            whatsapp_api_url: env::var("WHATSAPP_API_URL").unwrap_or_else(|_| String::new()),
            whatsapp_api_token: env::var("WHATSAPP_API_TOKEN").unwrap_or_else(|_| String::new()),
            whatsapp_webhook_secret: env::var("WHATSAPP_WEBHOOK_SECRET")
                .unwrap_or_else(|_| String::new()),
            calendar_api_url: env::var("CALENDAR_API_URL").unwrap_or_else(|_| String::new()),
            calendar_api_token: env::var("CALENDAR_API_TOKEN").unwrap_or_else(|_| String::new()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.database_url.is_empty()
            && !self.database_service_key.is_empty()
            && !self.internal_api_key.is_empty()
    }

    pub fn is_messaging_configured(&self) -> bool {
        !self.whatsapp_api_url.is_empty() && !self.whatsapp_api_token.is_empty()
    }

    pub fn is_calendar_mirror_configured(&self) -> bool {
        !self.calendar_api_url.is_empty() && !self.calendar_api_token.is_empty()
    }
}

fn parse_env_number<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid number, using default", name);
            default
        }),
        Err(_) => default,
    }
}
