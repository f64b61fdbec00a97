//! Language tag to runner lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use doctest_core::DocTestConfig;

use crate::runner::{CommandRunner, Runner};

/// Maps lower-cased language tags to runners.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: BTreeMap<String, Arc<dyn Runner>>,
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("languages", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RunnerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in interpreters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        let sh =
            CommandRunner::new("sh", "sh", "sh").with_line_pattern(r"{file}: (?:line )?(\d+):");
        registry.register("sh", Arc::new(sh));

        let bash =
            CommandRunner::new("bash", "bash", "sh").with_line_pattern(r"{file}: line (\d+)");
        registry.register_all(&["bash", "shell", "console"], Arc::new(bash));

        let python = CommandRunner::new("python", "python3", "py")
            .with_line_pattern(r#"{file}", line (\d+)"#);
        registry.register_all(&["python", "python3", "py"], Arc::new(python));

        let node =
            CommandRunner::new("javascript", "node", "js").with_line_pattern(r"{file}:(\d+)");
        registry.register_all(&["javascript", "js", "node"], Arc::new(node));

        let ruby = CommandRunner::new("ruby", "ruby", "rb").with_line_pattern(r"{file}:(\d+):");
        registry.register_all(&["ruby", "rb"], Arc::new(ruby));

        registry
    }

    /// Built-ins plus the config's `[runners.<lang>]` tables, which take
    /// precedence over built-ins with the same tag.
    pub fn from_config(config: &DocTestConfig) -> Self {
        let mut registry = Self::with_builtins();
        for (language, spec) in &config.runners {
            let runner: Arc<dyn Runner> = Arc::new(CommandRunner::from_spec(language, spec));
            registry.register(language, Arc::clone(&runner));
            for alias in &spec.aliases {
                registry.register(alias, Arc::clone(&runner));
            }
            tracing::debug!(language = %language, aliases = ?spec.aliases, "registered runner");
        }
        registry
    }

    pub fn register(&mut self, language: &str, runner: Arc<dyn Runner>) {
        self.runners.insert(language.to_ascii_lowercase(), runner);
    }

    pub fn register_all(&mut self, languages: &[&str], runner: Arc<dyn Runner>) {
        for language in languages {
            self.register(language, Arc::clone(&runner));
        }
    }

    /// Runner for `language`, compared case-insensitively.
    pub fn get(&self, language: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(&language.to_ascii_lowercase()).cloned()
    }

    pub fn supports(&self, language: &str) -> bool {
        self.runners.contains_key(&language.to_ascii_lowercase())
    }

    /// Every registered tag, sorted.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }
}
