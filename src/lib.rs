pub mod balances;
pub mod chain;
pub mod config;
pub mod detection;
pub mod discovery;
pub mod error;
pub mod models;
pub mod net;
pub mod resolution;
pub mod service;
pub mod session;
pub mod sources;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_helpers;
