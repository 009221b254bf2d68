//! Extraction configuration
//!
//! Every core call takes this by reference; nothing is read from process
//! state.

use std::time::Duration;

use crate::filter::FilterRules;

/// Settings for one extraction or lookup
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Pool holding directory fragments
    pub metadata_pool: String,
    /// Bound on reachability probes (session setup and the stat itself)
    pub probe_timeout: Duration,
    /// Omap entries fetched per listing request
    pub listing_page_size: usize,
    pub filter: FilterRules,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            metadata_pool: "metadata".to_string(),
            probe_timeout: Duration::from_secs(1),
            listing_page_size: 1024,
            filter: FilterRules::default(),
        }
    }
}

impl ExtractConfig {
    pub fn with_metadata_pool(mut self, pool: impl Into<String>) -> Self {
        self.metadata_pool = pool.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_filter(mut self, filter: FilterRules) -> Self {
        self.filter = filter;
        self
    }
}
