//! # embed-types
//!
//! Shared types for the embed-gateway workspace.
//!
//! This crate defines the vocabulary the other crates speak:
//! - [`Embedding`]: the normalized vector type
//! - [`DegradationError`] and its closed failure taxonomy
//! - [`BatchOutcome`]: explicit partial-failure accounting for batch calls
//! - [`EmbedJob`] / [`EmbedJobBatch`]: deferred work items
//! - [`Settings`]: layered configuration (defaults -> file -> env)
//! - Telemetry event types and the [`TelemetrySink`] trait

pub mod batch;
pub mod config;
pub mod embedding;
pub mod error;
pub mod telemetry;
pub mod work;

pub use batch::BatchOutcome;
pub use config::{
    BatchSettings, CacheSettings, CircuitSettings, ConfigError, DispatchSettings,
    ProviderSettings, RecoverySettings, RetrySettings, Settings,
};
pub use embedding::Embedding;
pub use error::{
    DegradationError, DegradationNotifier, FailureKind, FallbackStrategy, LogNotifier, Severity,
};
pub use telemetry::{
    CallOutcome, CircuitTransition, LogSink, NullSink, ProviderCall, TelemetrySink,
};
pub use work::{EmbedJob, EmbedJobBatch, JobPriority};
