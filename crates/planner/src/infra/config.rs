use {
    serde::Deserialize,
    std::{collections::BTreeMap, time::Duration},
};

/// Tunables of the planner. The embedding service deserializes this from
/// its TOML configuration; every default matches production behavior.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Wall-clock budget for one whole plan. On expiry the request fails
    /// without partial emission.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,

    /// Budget for any single external call (oracle, calldata builder,
    /// simulation).
    #[serde(with = "humantime_serde")]
    pub external_call_timeout: Duration,

    /// Bound on concurrently running independent lookups. Anything that
    /// mutates per-request state stays strictly sequential regardless.
    pub concurrency: usize,

    /// How many times the requested quantity of floor tokens a collection
    /// intent fetches; the surplus absorbs tokens that turn out to be
    /// ineligible.
    pub floor_redundancy: u64,

    /// Quantity assumed for items without one in preview mode.
    pub preview_quantity: u64,

    /// Tolerance for swap-received amounts, in bps of the expected quote.
    pub swap_slippage_bps: u32,

    /// Cap on the candidate listings considered per token intent.
    pub max_intent_listings: usize,

    /// Sources that may only be routed with their configured API key.
    pub restricted_sources: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(40),
            external_call_timeout: Duration::from_secs(10),
            concurrency: 20,
            floor_redundancy: 10,
            preview_quantity: 30,
            swap_slippage_bps: 500,
            max_intent_listings: 1000,
            restricted_sources: BTreeMap::new(),
        }
    }
}
