// src/lib.rs

//! ShadowMount install daemon
//!
//! Storage-scanning install orchestrator for a console homebrew environment.
//! Discovers unpacked application bundles dropped onto removable or internal
//! storage, extracts identifying metadata, exposes them as installed by
//! mounting the bundle read-only at a system-visible location, and registers
//! them with the platform install service - without duplicating the bulk of
//! the bundle's data.
//!
//! # Architecture
//!
//! - Single sequential poll loop, no internal parallelism
//! - Mount + selective copy + registration treated as a transaction with
//!   explicit rollback on any step's failure
//! - Durable per-title state machine with bounded retry and escalation to
//!   an interactive repair queue
//! - Copy-stability heuristics gate installs of directories still being
//!   written

pub mod config;
pub mod daemon;
mod error;
pub mod install;
pub mod manifest;
pub mod scanner;
pub mod state;

pub use config::{DaemonConfig, StabilityConfig, StabilityStrategy, SystemLayout};
pub use error::{Error, Result};
pub use install::{InstallFailure, InstallOutcome, MountInstaller};
pub use manifest::TitleMeta;
pub use scanner::{Candidate, DedupCache, PathScanner, StabilityGate};
pub use state::{RetryCoordinator, RetryDisposition, StateStore, TitleRecord, TitleState};
