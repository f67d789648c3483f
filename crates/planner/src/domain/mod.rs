pub mod eth;
pub mod fees;
pub mod intent;
pub mod mint;
pub mod order;
pub mod path;
pub mod plan;
pub mod pool;
