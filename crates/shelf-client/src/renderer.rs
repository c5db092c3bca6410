use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;

use shelf_core::error::AppError;
use shelf_core::pipeline::RenderPolicy;
use shelf_core::traits::PageRenderer;

const ANTIBOT_MARKERS: &[&str] = &[
    "challenge-platform",
    "cf-chl",
    "just a moment",
    "checking your browser",
    "captcha",
];

/// Headless Chromium that opens client-side-only product panels.
///
/// One browser process is shared by all clones; each render opens its own
/// tab and closes it before returning, whatever the outcome.
#[derive(Clone)]
pub struct BrowserRenderer {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserRenderer {
    /// Launches headless Chromium. `chrome_bin` overrides binary discovery.
    pub async fn launch(chrome_bin: Option<&str>, timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary(chrome_bin) {
            tracing::info!(chrome = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--lang=pl-PL")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }
}

/// Explicit path first, then well-known install locations. `None` leaves the
/// lookup to chromiumoxide.
fn find_chrome_binary(explicit: Option<&str>) -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Some(path) = explicit.map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(chrome = %path.display(), "Configured Chrome binary not found");
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}

fn looks_like_antibot(html: &str) -> bool {
    let lower = html.to_lowercase();
    ANTIBOT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Clicks the first visible control whose label contains a trigger keyword.
fn trigger_script(keywords: &[String]) -> Result<String, AppError> {
    let keywords = serde_json::to_string(keywords)?;
    Ok(format!(
        r#"(() => {{
            const keywords = {keywords}.map(k => k.toLowerCase());
            const controls = document.querySelectorAll('button, [role="button"], a');
            for (const el of controls) {{
                const label = (el.innerText || el.textContent || '').trim().toLowerCase();
                if (label && keywords.some(k => label.includes(k))) {{
                    el.scrollIntoView({{ block: 'center' }});
                    el.click();
                    return true;
                }}
            }}
            return false;
        }})()"#
    ))
}

async fn content(page: &Page) -> Result<String, AppError> {
    page.content()
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))
}

async fn interact(page: &Page, url: &str, policy: &RenderPolicy) -> Result<String, AppError> {
    page.wait_for_navigation()
        .await
        .map_err(|e| AppError::BrowserError(format!("Navigation to {url} failed: {e}")))?;
    tokio::time::sleep(policy.idle_wait).await;

    for attempt in 1..=policy.antibot_rechecks {
        if !looks_like_antibot(&content(page).await?) {
            break;
        }
        tracing::info!(%url, attempt, "Anti-bot interstitial, waiting");
        tokio::time::sleep(policy.antibot_wait).await;
    }

    let clicked = page
        .evaluate(trigger_script(&policy.trigger_keywords)?)
        .await
        .ok()
        .and_then(|result| result.into_value::<bool>().ok())
        .unwrap_or(false);

    if !clicked {
        match page.find_element(policy.fallback_selector.as_str()).await {
            Ok(element) => {
                if let Err(e) = element.click().await {
                    tracing::debug!(%url, error = %e, "Fallback trigger click failed");
                }
            }
            Err(_) => tracing::debug!(%url, "No modal trigger on page"),
        }
    }

    let mut opened = false;
    for _ in 0..policy.modal_polls {
        if page.find_element(policy.modal_selector.as_str()).await.is_ok() {
            opened = true;
            break;
        }
        tokio::time::sleep(policy.modal_poll_interval).await;
    }
    if !opened {
        tracing::debug!(%url, "Modal did not appear, returning page as is");
    }

    content(page).await
}

impl PageRenderer for BrowserRenderer {
    async fn render_interactive(
        &self,
        url: &str,
        policy: &RenderPolicy,
    ) -> Result<Option<String>, AppError> {
        let page = tokio::time::timeout(self.timeout, self.browser.new_page(url))
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| AppError::BrowserError(format!("Failed to open {url}: {e}")))?;

        let result = tokio::time::timeout(self.timeout, interact(&page, url, policy)).await;

        if let Err(e) = page.close().await {
            tracing::debug!(%url, error = %e, "Failed to close tab");
        }

        match result {
            Ok(html) => html.map(Some),
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }
}
