use std::time::Duration;

use chrono::{DateTime, Local};
use reqwest::Client;
use serde_json::json;

use shelf_core::config::TelegramConfig;
use shelf_core::error::AppError;
use shelf_core::task::TaskType;
use shelf_core::traits::{Notifier, TaskEvent};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Logs lifecycle events. Used when no chat is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(&self, event: TaskEvent) {
        match event {
            TaskEvent::Started {
                task_id,
                task_type,
                limit,
            } => tracing::info!(task_id, task_type = %task_type, ?limit, "Task started"),
            TaskEvent::Completed {
                task_id,
                task_type,
                stats,
                duration,
            } => tracing::info!(
                task_id,
                task_type = %task_type,
                processed = stats.processed,
                created = stats.created,
                updated = stats.updated,
                errors = stats.errors,
                duration_secs = duration.as_secs(),
                "Task completed"
            ),
            TaskEvent::Failed {
                task_id,
                task_type,
                error,
            } => tracing::warn!(task_id, task_type = %task_type, %error, "Task failed"),
        }
    }
}

/// Sends lifecycle events to a Telegram chat through the Bot API.
///
/// Delivery is best effort: failures are logged and never reach the caller.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            config,
        })
    }

    /// Points the notifier at a different Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, text: &str) -> Result<(), AppError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.config.bot_token);
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::NetworkError(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::HttpError(format!(
                "Telegram API returned {}: {detail}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, event: TaskEvent) {
        let text = render_message(&event, Local::now());
        if let Err(e) = self.send(&text).await {
            tracing::error!(error = %e, "Telegram notification failed");
        }
    }
}

/// Either sink, chosen at startup.
#[derive(Clone)]
pub enum AnyNotifier {
    Tracing(TracingNotifier),
    Telegram(TelegramNotifier),
}

impl AnyNotifier {
    /// Telegram when credentials are configured, tracing otherwise.
    pub fn from_config(telegram: Option<TelegramConfig>) -> Result<Self, AppError> {
        Ok(match telegram {
            Some(config) => Self::Telegram(TelegramNotifier::new(config)?),
            None => Self::Tracing(TracingNotifier),
        })
    }
}

impl Notifier for AnyNotifier {
    async fn notify(&self, event: TaskEvent) {
        match self {
            Self::Tracing(inner) => inner.notify(event).await,
            Self::Telegram(inner) => inner.notify(event).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

fn task_type_label(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Categories => "Категории",
        TaskType::Products => "Продукты",
        TaskType::Bestsellers => "Хиты продаж",
        TaskType::PopularCategories => "Популярные категории",
        TaskType::CategoryImages => "Картинки категорий",
        TaskType::ProductImages => "Картинки продуктов",
    }
}

fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours} ч"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} мин"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds} сек"));
    }
    if parts.is_empty() {
        "0 сек".to_string()
    } else {
        parts.join(" ")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_message(event: &TaskEvent, now: DateTime<Local>) -> String {
    let timestamp = now.format("%d.%m.%Y %H:%M:%S");
    match event {
        TaskEvent::Started {
            task_id,
            task_type,
            limit,
        } => {
            let limit = limit.map_or_else(|| "без ограничений".to_string(), |l| l.to_string());
            format!(
                "🚀 <b>Парсинг запущен</b>\n\n\
                 Задача: #{task_id}\n\
                 Тип: {}\n\
                 Ограничение: {limit}\n\
                 Время: {timestamp}",
                task_type_label(*task_type)
            )
        }
        TaskEvent::Completed {
            task_id,
            task_type,
            stats,
            duration,
        } => format!(
            "✅ <b>Парсинг завершен</b>\n\n\
             Задача: #{task_id}\n\
             Тип: {}\n\
             Обработано: {}\n\
             Создано: {}\n\
             Обновлено: {}\n\
             Ошибок: {}\n\
             Время выполнения: {}",
            task_type_label(*task_type),
            stats.processed,
            stats.created,
            stats.updated,
            stats.errors,
            format_duration(*duration)
        ),
        TaskEvent::Failed {
            task_id,
            task_type,
            error,
        } => format!(
            "❌ <b>Ошибка парсинга</b>\n\n\
             Задача: #{task_id}\n\
             Тип: {}\n\
             Ошибка: {}\n\
             Время: {timestamp}",
            task_type_label(*task_type),
            escape_html(error)
        ),
    }
}
