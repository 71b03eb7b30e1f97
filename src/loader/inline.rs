//! Inline template text resolver

use super::{LoaderError, Resolver, Source};

/// True when `name` could plausibly be a file reference
///
/// Path-like names consist only of ASCII letters, digits and `- . / _ ~ @`.
pub fn looks_like_path(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/' | '_' | '~' | '@'))
}

/// Treats the requested name as the template text itself
///
/// Names that look like paths never exist here, so inline rendering cannot
/// shadow a file lookup further up the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineResolver;

impl Resolver for InlineResolver {
    fn kind(&self) -> &'static str {
        "inline"
    }

    fn exists(&self, name: &str) -> bool {
        !looks_like_path(name)
    }

    fn load(&self, name: &str) -> Result<Source, LoaderError> {
        if !self.exists(name) {
            return Err(LoaderError::not_found(name));
        }
        Ok(Source {
            name: name.to_string(),
            text: name.to_string(),
            cache_key: format!("inline:{}", name),
            path: None,
        })
    }
}
