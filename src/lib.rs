//! Asynchronous product import pipeline.
//!
//! An uploaded spreadsheet is stored, recorded as `pending`, queued, then
//! claimed by a worker that upserts its rows into the product catalog in
//! batches. Every lifecycle transition is written to the history store and
//! announced to subscribers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod history;
pub mod import;
pub mod intake;
pub mod job;
pub mod models;
pub mod notify;
pub mod queue;
pub mod storage;
pub mod tracing;
pub mod worker;

pub mod util {
    pub mod db;
    pub mod env;
}

#[cfg(test)]
mod test_support;

pub use error::ImportError;
pub use models::{FileStatus, History, Product};
