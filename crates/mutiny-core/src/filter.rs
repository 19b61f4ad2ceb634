//! Name-based filtering of tests and testees

use crate::config::Config;

/// Substring filters derived from configuration
///
/// `tests` is an allowlist applied at discovery time; `exclude_locations`
/// removes functions from testee selection.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    tests: Vec<String>,
    exclude_locations: Vec<String>,
}

impl Filter {
    /// Build the filter from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            tests: config.tests.clone(),
            exclude_locations: config.exclude_locations.clone(),
        }
    }

    /// True if the test name passes the allowlist (empty list allows all)
    #[must_use]
    pub fn allows_test(&self, name: &str) -> bool {
        self.tests.is_empty() || self.tests.iter().any(|pattern| name.contains(pattern.as_str()))
    }

    /// True if the function name matches an exclusion substring
    #[must_use]
    pub fn excludes_function(&self, name: &str) -> bool {
        self.exclude_locations
            .iter()
            .any(|pattern| name.contains(pattern.as_str()))
    }
}
