//! Formatter registry
//!
//! Custom formatters turn raw container and string internals into concise
//! displays. Each formatter is registered under a type-name key with all
//! namespace qualifiers stripped and remaining `::` separators replaced by
//! `__`, so `MyNs::Map<K,V>` and a vendored copy under another namespace
//! share one formatter. Exact-name matches always win over regex
//! registrations; regex registrations are tried in registration order.
//!
//! Formatters are grouped into modules so the whole set can be rebuilt at
//! runtime after the embedding front end updates its formatter scripts.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::engine::Inspector;
use crate::error::{Result, ValViewError};
use crate::value::ValueHandle;

/// A custom display routine for one family of types.
///
/// The formatter drives the emitter on `d` for the current item: it puts
/// the value, the child count, and children if expanded. Errors propagate
/// to the enclosing item boundary where non-fatal ones degrade to a
/// "not accessible" display.
pub trait Formatter: Send + Sync {
    fn format(&self, d: &mut Inspector, value: &ValueHandle) -> Result<()>;
}

impl<F> Formatter for F
where
    F: Fn(&mut Inspector, &ValueHandle) -> Result<()> + Send + Sync,
{
    fn format(&self, d: &mut Inspector, value: &ValueHandle) -> Result<()> {
        self(d, value)
    }
}

/// A batch of formatter registrations that can be re-applied on reload.
pub trait FormatterModule: Send + Sync {
    fn register(&self, registry: &mut RegistryBuilder);
}

/// Mutable view handed to [`FormatterModule::register`].
#[derive(Default)]
pub struct RegistryBuilder {
    exact: HashMap<String, Arc<dyn Formatter>>,
    patterns: Vec<(Regex, Arc<dyn Formatter>)>,
}

impl RegistryBuilder {
    /// Register under an exact matching key. The key is normalized the
    /// same way lookup keys are.
    pub fn register(&mut self, type_name: &str, formatter: impl Formatter + 'static) {
        self.exact
            .insert(normalize_type_key(type_name), Arc::new(formatter));
    }

    /// Register under a regex matched against normalized lookup keys.
    pub fn register_pattern(
        &mut self,
        pattern: &str,
        formatter: impl Formatter + 'static,
    ) -> Result<()> {
        let re = Regex::new(pattern).map_err(|e| {
            ValViewError::Backend(format!("bad formatter pattern '{pattern}': {e}"))
        })?;
        self.patterns.push((re, Arc::new(formatter)));
        Ok(())
    }
}

/// The formatter lookup table for a session.
#[derive(Default)]
pub struct FormatterRegistry {
    exact: HashMap<String, Arc<dyn Formatter>>,
    patterns: Vec<(Regex, Arc<dyn Formatter>)>,
    modules: Vec<Arc<dyn FormatterModule>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a module and apply its registrations immediately.
    pub fn add_module(&mut self, module: Arc<dyn FormatterModule>) {
        let mut builder = RegistryBuilder::default();
        module.register(&mut builder);
        self.absorb(builder);
        self.modules.push(module);
    }

    /// One-off registration outside any module. Lost on [`reload`].
    ///
    /// [`reload`]: FormatterRegistry::reload
    pub fn register(&mut self, type_name: &str, formatter: impl Formatter + 'static) {
        self.exact
            .insert(normalize_type_key(type_name), Arc::new(formatter));
    }

    /// Drop all registrations and re-run every installed module.
    pub fn reload(&mut self) {
        debug!(modules = self.modules.len(), "reloading formatters");
        self.exact.clear();
        self.patterns.clear();
        let modules = self.modules.clone();
        for module in modules {
            let mut builder = RegistryBuilder::default();
            module.register(&mut builder);
            self.absorb(builder);
        }
    }

    /// Find the formatter for a type name, exact match first, then regex
    /// registrations in registration order.
    pub fn lookup(&self, type_name: &str, namespace: &str) -> Option<Arc<dyn Formatter>> {
        let key = lookup_key(type_name, namespace);
        if let Some(f) = self.exact.get(&key) {
            return Some(Arc::clone(f));
        }
        for (re, f) in &self.patterns {
            if re.is_match(&key) {
                return Some(Arc::clone(f));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn absorb(&mut self, builder: RegistryBuilder) {
        self.exact.extend(builder.exact);
        self.patterns.extend(builder.patterns);
    }
}

/// Build the lookup key for a concrete type name: strip the configured
/// library namespace, then normalize.
pub fn lookup_key(type_name: &str, namespace: &str) -> String {
    let stripped = if !namespace.is_empty() {
        type_name.replace(namespace, "")
    } else {
        type_name.to_string()
    };
    normalize_type_key(&stripped)
}

fn normalize_type_key(type_name: &str) -> String {
    // Template arguments never participate in registration keys
    let base = match type_name.find('<') {
        Some(p) => &type_name[..p],
        None => type_name,
    };
    base.trim().replace("::", "__")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl Formatter {
        |_: &mut Inspector, _: &ValueHandle| Ok(())
    }

    #[test]
    fn test_exact_lookup_with_namespace() {
        let mut reg = FormatterRegistry::new();
        reg.register("Str", noop());
        assert!(reg.lookup("Str", "").is_some());
        assert!(reg.lookup("MyNs::Str", "MyNs::").is_some());
        assert!(reg.lookup("Other", "").is_none());
    }

    #[test]
    fn test_template_arguments_ignored() {
        let mut reg = FormatterRegistry::new();
        reg.register("Map", noop());
        assert!(reg.lookup("Map<int, Str>", "").is_some());
    }

    #[test]
    fn test_nested_names_normalized() {
        let mut reg = FormatterRegistry::new();
        reg.register("Outer::Inner", noop());
        assert!(reg.lookup("Outer::Inner", "").is_some());
        assert_eq!(normalize_type_key("Outer::Inner"), "Outer__Inner");
    }

    #[test]
    fn test_exact_beats_pattern() {
        struct Mark(&'static str);
        impl Formatter for Mark {
            fn format(&self, d: &mut Inspector, _: &ValueHandle) -> Result<()> {
                d.put_value(self.0);
                Ok(())
            }
        }

        let mut builder = RegistryBuilder::default();
        builder.register_pattern("^Vec", Mark("pattern")).unwrap();
        builder.register("Vec", Mark("exact"));

        let mut reg = FormatterRegistry::new();
        reg.absorb(builder);
        // Both match "Vec"; exact must win
        assert!(reg.lookup("Vec<int>", "").is_some());
        let mut d = crate::engine::Inspector::new(
            Box::new(crate::backend::MockBackend::new(8)),
            crate::engine::DumpOptions::default(),
        );
        let ty = d.create_type("Vec<int>").unwrap();
        let v = ValueHandle::from_bytes(ty, vec![]);
        let f = reg.lookup("Vec<int>", "").unwrap();
        d.with_top_level("local.v", |d| {
            f.format(d, &v)?;
            d.put_num_child(0);
            Ok(())
        })
        .unwrap();
        assert!(d.output().contains("value=\"exact\""));
    }

    #[test]
    fn test_patterns_in_registration_order() {
        let mut builder = RegistryBuilder::default();
        builder.register_pattern("^List", noop()).unwrap();
        builder.register_pattern("^L", noop()).unwrap();
        let mut reg = FormatterRegistry::new();
        reg.absorb(builder);
        assert_eq!(reg.len(), 2);
        assert!(reg.lookup("List<int>", "").is_some());
    }

    #[test]
    fn test_reload_reruns_modules() {
        struct Mod;
        impl FormatterModule for Mod {
            fn register(&self, registry: &mut RegistryBuilder) {
                registry.register("Str", |_: &mut Inspector, _: &ValueHandle| Ok(()));
            }
        }
        let mut reg = FormatterRegistry::new();
        reg.add_module(Arc::new(Mod));
        reg.register("Transient", noop());
        assert_eq!(reg.len(), 2);
        reg.reload();
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup("Str", "").is_some());
        assert!(reg.lookup("Transient", "").is_none());
    }

    #[test]
    fn test_bad_pattern_is_error() {
        let mut builder = RegistryBuilder::default();
        assert!(builder.register_pattern("(", noop()).is_err());
    }
}
