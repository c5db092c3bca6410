use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AppError;

/// Computes a SHA-256 hex digest of the given string.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolves a possibly relative or protocol-relative locator against `base`.
pub fn normalize_url(raw: &str, base: &str) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidInput("empty URL".into()));
    }
    if let Ok(absolute) = Url::parse(raw) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(base)
        .map_err(|e| AppError::ConfigError(format!("Invalid base URL '{base}': {e}")))?;
    base.join(raw)
        .map(|u| u.to_string())
        .map_err(|e| AppError::InvalidInput(format!("Cannot resolve '{raw}': {e}")))
}

/// `8-4-4-4-12` hex groups. Category ids of this shape are never served by
/// the search API.
pub fn is_uuid_like(id: &str) -> bool {
    let groups: Vec<&str> = id.trim().split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Strips dots, dashes and whitespace from an article number.
pub fn normalize_sku(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
        .collect()
}

/// Lookup variants for an article number: as given, normalized, with and
/// without the leading `s` used for combination articles.
pub fn sku_variants(raw: &str) -> Vec<String> {
    let trimmed = raw.trim().to_string();
    let normalized = normalize_sku(raw);
    let bare = normalized
        .strip_prefix(['s', 'S'])
        .unwrap_or(&normalized)
        .to_string();

    let mut variants = Vec::with_capacity(4);
    for candidate in [normalized.clone(), trimmed, bare.clone(), format!("s{bare}")] {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}
