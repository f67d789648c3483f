use {
    crate::domain::eth::{Address, U256},
    anyhow::Result,
    chrono::{DateTime, Utc},
};

/// Wall clock, injectable so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PriceOracle: Send + Sync {
    /// Converts `amount` of `from` into `to` at the rate observed at `at`.
    /// Returns `None` when no price is known, or when the freshest known
    /// price is stale and the caller did not accept staleness. Buy-in
    /// display conversions accept stale prices; swap validation does not.
    async fn convert(
        &self,
        from: Address,
        to: Address,
        amount: U256,
        at: DateTime<Utc>,
        accept_stale: bool,
    ) -> Result<Option<U256>>;
}
