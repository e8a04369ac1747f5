//! # Source Path Conversion
//!
//! The VM identifies sources by chunk name (`@scripts/main.lua`, `=stdin`,
//! or the source text itself for string chunks). Breakpoints and stack
//! frames talk about client-side file paths. [`PathResolver`] maps one to
//! the other, either with the built-in rule or with a host-installed
//! [`PathConvert`], and remembers every answer so the converter runs at most
//! once per distinct source identifier. Answers are shared (`Rc<str>`), so
//! the per-line lookup in the hook never allocates.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::breakpoints::normalize;

/// Host hook translating a VM source identifier into a client path.
///
/// Return `None` for sources that have no file behind them.
pub trait PathConvert
{
    /// Convert one source identifier.
    fn convert(&mut self, source: &str) -> Option<String>;
}

impl<F> PathConvert for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn convert(&mut self, source: &str) -> Option<String>
    {
        self(source)
    }
}

/// Built-in conversion: `@path` is a file, everything else is not.
#[must_use]
pub fn default_convert(source: &str) -> Option<String>
{
    source.strip_prefix('@').map(normalize)
}

/// Cached source → path resolution.
#[derive(Default)]
pub struct PathResolver
{
    custom: Option<Box<dyn PathConvert>>,
    cache: HashMap<String, Option<Rc<str>>>,
}

impl std::fmt::Debug for PathResolver
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PathResolver")
            .field("custom", &self.custom.is_some())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl PathResolver
{
    /// Resolver using the built-in rule.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Install a custom converter. Previously cached answers are dropped.
    pub fn set_custom(&mut self, convert: Box<dyn PathConvert>)
    {
        self.custom = Some(convert);
        self.cache.clear();
    }

    /// Resolve a source identifier.
    pub fn resolve(&mut self, source: &str) -> Option<Rc<str>>
    {
        if let Some(hit) = self.cache.get(source) {
            return hit.clone();
        }
        let resolved: Option<Rc<str>> = match self.custom.as_mut() {
            Some(custom) => custom.convert(source).map(|p| normalize(&p)),
            None => default_convert(source),
        }
        .map(Rc::from);
        trace!(source, resolved = ?resolved, "source resolved");
        self.cache.insert(source.to_string(), resolved.clone());
        resolved
    }

    /// Forget cached answers (binding ended).
    pub fn clear_cache(&mut self)
    {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests
{
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_default_rule()
    {
        assert_eq!(default_convert("@scripts\\main.lua"), Some("scripts/main.lua".to_string()));
        assert_eq!(default_convert("=stdin"), None);
        assert_eq!(default_convert("return 1"), None);
    }

    #[test]
    fn test_custom_called_once_per_source()
    {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut resolver = PathResolver::new();
        resolver.set_custom(Box::new(move |source: &str| {
            counter.set(counter.get() + 1);
            Some(format!("/abs/{}", source.trim_start_matches('@')))
        }));

        assert_eq!(resolver.resolve("@a.lua").as_deref(), Some("/abs/a.lua"));
        assert_eq!(resolver.resolve("@a.lua").as_deref(), Some("/abs/a.lua"));
        assert_eq!(resolver.resolve("@b.lua").as_deref(), Some("/abs/b.lua"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_cached_answer_is_shared()
    {
        let mut resolver = PathResolver::new();
        let first = resolver.resolve("@lib/util.lua").unwrap();
        let second = resolver.resolve("@lib/util.lua").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(resolver.resolve("=stdin"), None);
    }
}
