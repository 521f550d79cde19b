#![doc = "car-harvest-core: the harvesting pipeline behind car-harvest."]

//! Everything that decides *what* happens during a run lives here: pacing,
//! bounded concurrency, date filtering, CSV export, dated remote folders,
//! retried uploads, and the chunked orchestration tying them together.
//!
//! The crate never talks to the network itself. Page extraction and remote
//! storage are reached through the traits in [`contract`]; the `car-harvest`
//! binary supplies HTTP and Google Drive implementations, tests supply
//! `mockall` mocks.
//!
//! # Usage
//! Build a [`config::RunConfig`], hand it to [`orchestrator::Orchestrator`]
//! together with an [`contract::Extractor`], then call `run` with a
//! [`contract::RemoteAuthenticator`].

pub mod chunk;
pub mod config;
pub mod contract;
pub mod export;
pub mod filter;
pub mod folders;
pub mod harvest;
pub mod limiter;
pub mod orchestrator;
pub mod pacing;
pub mod retry;
pub mod upload;

pub use config::{CategorySpec, PacingConfig, PagePlan, RetryPolicy, RunConfig};
pub use orchestrator::{Orchestrator, RunError, RunReport};
