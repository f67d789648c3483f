mod blur_auth;
mod erc721c;
mod insufficient_balance;
mod mints;
mod partial_collection;
mod permits;
mod pool_pricing;
mod preview;
mod single_listing;
