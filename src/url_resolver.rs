use tracing::debug;
use url::Url;

use crate::error::AssetError;

const INLINE_SCHEMES: [&str; 2] = ["data:", "blob:"];

/// Returns true for references whose content lives inside the markup or in
/// browser memory and can never be fetched on its own.
pub fn is_inline_reference(reference: &str) -> bool {
    let trimmed = reference.trim_start();
    INLINE_SCHEMES.iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

/// Resolves references found in markup against the page they came from.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base_url: Url,
}

impl UrlResolver {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// `Ok(None)` means "not fetchable, leave it alone": empty references,
    /// same-document fragments (`url(#clip)`), `data:`/`blob:` references and
    /// anything that does not resolve to HTTP(S).
    pub fn resolve(&self, reference: &str) -> Result<Option<Url>, AssetError> {
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') || is_inline_reference(reference) {
            return Ok(None);
        }

        let resolved = self
            .base_url
            .join(reference)
            .map_err(|source| AssetError::InvalidReference {
                reference: reference.to_string(),
                source,
            })?;

        match resolved.scheme() {
            "http" | "https" => Ok(Some(resolved)),
            scheme => {
                debug!(reference, scheme, "skipping non-http reference");
                Ok(None)
            }
        }
    }
}
