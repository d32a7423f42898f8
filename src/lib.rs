pub mod aggregator;
pub mod blob_client;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod ledger_client;
pub mod listener;
pub mod quality;
pub mod reputation;
pub mod snapshot;
pub mod threshold;
pub mod weights;
