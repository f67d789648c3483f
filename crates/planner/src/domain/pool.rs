use {
    super::eth::{Address, U256},
    std::collections::HashMap,
};

/// Per-request cursor over the marginal price schedules of AMM-style pools.
///
/// Pools publish the unit price of the 1st, 2nd, ... additional NFT bought
/// from them. A cart holding k items from the same pool must sum the first
/// k entries of that schedule, so every planning decision advances the
/// cursor and later candidates from the same pool see the moved price. The
/// tracker dies with the request.
#[derive(Debug, Default)]
pub struct PoolTracker {
    pools: HashMap<Address, PoolState>,
}

#[derive(Debug)]
struct PoolState {
    prices: Vec<U256>,
    consumed: usize,
}

impl PoolTracker {
    pub fn is_seeded(&self, pool: Address) -> bool {
        self.pools.contains_key(&pool)
    }

    /// Installs the price schedule reported by the pool's protocol. The
    /// first seed wins; repeated seeds of the same pool are ignored so the
    /// cursor is never reset mid-request.
    pub fn seed(&mut self, pool: Address, prices: Vec<U256>) {
        self.pools
            .entry(pool)
            .or_insert(PoolState { prices, consumed: 0 });
    }

    /// The unit price of the next fill from this pool, advancing the
    /// cursor. Past the end of the schedule the last entry repeats. `None`
    /// for unseeded pools and pools with an empty schedule.
    pub fn next_price(&mut self, pool: Address) -> Option<U256> {
        let state = self.pools.get_mut(&pool)?;
        let price = state
            .prices
            .get(state.consumed.min(state.prices.len().checked_sub(1)?))
            .copied()?;
        state.consumed += 1;
        Some(price)
    }

    /// Rolls the cursor back by `count`, undoing fills that were rolled
    /// back out of the path.
    pub fn release(&mut self, pool: Address, count: usize) {
        if let Some(state) = self.pools.get_mut(&pool) {
            state.consumed = state.consumed.saturating_sub(count);
        }
    }

    pub fn consumed(&self, pool: Address) -> usize {
        self.pools.get(&pool).map_or(0, |state| state.consumed)
    }

    /// Remaining schedule depth, the upper bound a preview reports for
    /// pool-backed items.
    pub fn depth(&self, pool: Address) -> usize {
        self.pools
            .get(&pool)
            .map_or(0, |state| state.prices.len().saturating_sub(state.consumed))
    }
}
