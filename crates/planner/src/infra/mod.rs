pub mod config;
pub mod ethereum;
pub mod oracle;
pub mod orderbook;
pub mod router;
pub mod signatures;

pub use {
    config::Config,
    ethereum::Ethereum,
    oracle::{Clock, PriceOracle, SystemClock},
    orderbook::{OrderBook, OrderIngest},
    router::Router,
    signatures::{AuthChallenger, SignatureStore},
};
