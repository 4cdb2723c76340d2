//! Graph optimization configuration.
//!
//! Provides typed configuration with bon builders and environment variable
//! fallbacks.

use bon::bon;

/// Default number of positions searched past a conflicting unit.
pub const DEFAULT_LOOKAHEAD: usize = 8;

/// Default maximum number of nodes in one fused unit, starter included.
pub const DEFAULT_MAX_FUSE: usize = 16;

/// Configuration for [`optimize_graph`](crate::optimize_graph).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphOptimizeConfig {
    /// Run the pass at all. When false the node array is left untouched.
    pub enabled: bool,
    /// Group fusable chains before reordering.
    pub fusion: bool,
    /// Reorder units for concurrency.
    pub reorder: bool,
    /// Positions searched past a conflicting unit.
    pub lookahead: usize,
    /// Maximum nodes per fused unit.
    pub max_fuse: usize,
    /// Diagnostic verbosity. Above 2, every tracked range is traced.
    pub debug: u8,
}

impl Default for GraphOptimizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fusion: true,
            reorder: true,
            lookahead: DEFAULT_LOOKAHEAD,
            max_fuse: DEFAULT_MAX_FUSE,
            debug: 0,
        }
    }
}

#[bon]
impl GraphOptimizeConfig {
    /// Create a configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = true)] enabled: bool,
        #[builder(default = true)] fusion: bool,
        #[builder(default = true)] reorder: bool,
        #[builder(default = DEFAULT_LOOKAHEAD)] lookahead: usize,
        #[builder(default = DEFAULT_MAX_FUSE)] max_fuse: usize,
        #[builder(default = 0)] debug: u8,
    ) -> Self {
        Self { enabled, fusion, reorder, lookahead, max_fuse, debug }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_GRAPH_OPTIMIZE_DISABLE` - Leave node arrays untouched if set
    /// * `TESSERA_FUSION_DISABLE` - Skip chain fusion if set
    /// * `TESSERA_CONCURRENCY_DISABLE` - Skip reordering if set
    /// * `TESSERA_GRAPH_LOOKAHEAD` - Lookahead window (default: 8, at least 1)
    /// * `TESSERA_MAX_FUSE` - Maximum fused unit size (default: 16, at least 1)
    /// * `TESSERA_GRAPH_DEBUG` - Diagnostic verbosity (default: 0)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let positive = |key: &str, default: usize| {
            lookup(key).and_then(|s| s.parse::<usize>().ok()).filter(|&n| n > 0).unwrap_or(default)
        };

        Self {
            enabled: lookup("TESSERA_GRAPH_OPTIMIZE_DISABLE").is_none(),
            fusion: lookup("TESSERA_FUSION_DISABLE").is_none(),
            reorder: lookup("TESSERA_CONCURRENCY_DISABLE").is_none(),
            lookahead: positive("TESSERA_GRAPH_LOOKAHEAD", DEFAULT_LOOKAHEAD),
            max_fuse: positive("TESSERA_MAX_FUSE", DEFAULT_MAX_FUSE),
            debug: lookup("TESSERA_GRAPH_DEBUG").and_then(|s| s.parse().ok()).unwrap_or(0),
        }
    }
}
