pub mod clock;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod stats;
pub mod store;
pub mod winner;
