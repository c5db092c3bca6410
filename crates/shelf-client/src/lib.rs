pub mod api;
pub mod extractor;
pub mod notifier;
#[cfg(feature = "browser")]
pub mod renderer;
pub mod transport;

pub use api::OriginApiClient;
pub use extractor::ScraperExtractor;
pub use notifier::{AnyNotifier, TelegramNotifier, TracingNotifier};
#[cfg(feature = "browser")]
pub use renderer::BrowserRenderer;
pub use transport::ReqwestTransport;
