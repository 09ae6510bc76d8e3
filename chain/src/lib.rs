pub mod config;

pub use config::{ChainConfig, Network};
