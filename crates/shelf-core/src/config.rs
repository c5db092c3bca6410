use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_SEARCH_URL: &str =
    "https://sik.search.blue.cdtapps.com/pl/pl/search?c=listaf&v=20241114";
pub const DEFAULT_CATEGORIES_URL: &str =
    "https://www.ikea.com/pl/pl/meta-data/navigation/catalog-products-slim.json";

/// Origin site endpoints and request defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    pub base_url: String,
    pub locale_path: String,
    pub search_url: String,
    pub categories_url: String,
    pub zip: String,
    pub store: String,
    pub user_agent: String,
    pub http_timeout: Duration,
}

impl OriginConfig {
    /// `base_url` joined with `locale_path`, e.g. `https://www.ikea.com/pl/pl/`.
    pub fn homepage_url(&self) -> String {
        format!(
            "{}/{}/",
            self.base_url.trim_end_matches('/'),
            self.locale_path.trim_matches('/')
        )
    }
}

/// Bot API credentials for lifecycle notifications.
#[derive(Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Runtime configuration of the acquisition core.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub origin: OriginConfig,
    pub proxy_backoff: Duration,
    pub images_root: PathBuf,
    pub image_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub schedule_interval: Duration,
    pub schedule_run_due: bool,
    pub telegram: Option<TelegramConfig>,
    pub chrome_bin: Option<String>,
}

impl HarvestConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unset keys take defaults,
    /// malformed numbers are a [`AppError::ConfigError`] naming the key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let image_concurrency: usize = parse_or(&get, "IMAGE_DOWNLOAD_CONCURRENCY", 4)?;
        if image_concurrency == 0 {
            return Err(AppError::ConfigError(
                "IMAGE_DOWNLOAD_CONCURRENCY must be at least 1".into(),
            ));
        }

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Ok(Self {
            origin: OriginConfig {
                base_url: text("ORIGIN_BASE_URL", "https://www.ikea.com"),
                locale_path: text("ORIGIN_LOCALE_PATH", "/pl/pl/"),
                search_url: text("ORIGIN_SEARCH_URL", DEFAULT_SEARCH_URL),
                categories_url: text("ORIGIN_CATEGORIES_URL", DEFAULT_CATEGORIES_URL),
                zip: text("ORIGIN_ZIP", "01-106"),
                store: text("ORIGIN_STORE", "307"),
                user_agent: text("USER_AGENT", DEFAULT_USER_AGENT),
                http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30)?),
            },
            proxy_backoff: Duration::from_millis(parse_or(&get, "PROXY_BLOCKED_BACKOFF_MS", 500)?),
            images_root: PathBuf::from(text("IMAGES_ROOT", "public/images")),
            image_concurrency,
            worker_poll_interval: Duration::from_secs(parse_or(
                &get,
                "WORKER_POLL_INTERVAL_SECS",
                5,
            )?),
            schedule_interval: Duration::from_secs(parse_or(&get, "SCHEDULE_INTERVAL_SECS", 60)?),
            schedule_run_due: parse_flag(&get, "SCHEDULE_RUN_DUE")?,
            telegram,
            chrome_bin: get("CHROME_BIN"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
        }),
    }
}

fn parse_flag<G>(get: &G, key: &str) -> Result<bool, AppError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(AppError::ConfigError(format!(
            "Invalid {key} '{other}': expected true or false"
        ))),
    }
}
