pub mod accounts;
pub mod aggregator;
pub mod cli;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod participant;
pub mod recipients;
pub mod reporter;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;
