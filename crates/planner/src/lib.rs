//! Order aggregation and fill-routing core of an NFT marketplace
//! aggregator. Turns a cart of heterogeneous buy-intents into a resumable,
//! idempotent execution plan of signature and transaction steps, spanning
//! the secondary-market protocols and open mints the order book indexes.

pub mod domain;
pub mod execute;
pub mod infra;
pub mod observe;
pub mod util;

#[cfg(test)]
mod tests;

pub use crate::{
    domain::plan::ExecutionPlan,
    execute::{Error, Planner, Request, RequestItem},
    infra::Config,
};
