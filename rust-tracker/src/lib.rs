//! Sestrack - AWS SES email event tracking service.
//!
//! This library provides the pieces behind the `sestrack-web` binary:
//! - `web`: webhook endpoint, security gate, SNS signature verification
//! - `process`: SNS envelope parsing and SES event normalization
//! - `track`: email logs, correlation and the status state machine
//! - `send`: outbound dispatch interceptor with delivery tracking
//! - `notify`: fire-and-forget broadcast of tracking updates
//!
//! ## Architecture
//!
//! ```text
//! SNS POST → Security Gate → Envelope Parser → Normalizer
//!          → LogStore::ingest (correlate + apply + audit) → Sink
//! ```

pub mod config;
pub mod notify;
pub mod process;
pub mod send;
pub mod track;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use notify::{AmqpSink, NotificationSink, NullSink, TrackingUpdate};
pub use process::{EventPipeline, ProcessOutcome, SnsEnvelope};
pub use send::{MailTransport, OutgoingEmail, ProviderResponse, TrackedMailer};
pub use track::{
    EmailEvent, EmailLog, EmailStatus, EventKind, LogStore, MemoryStore, NormalizedEvent,
};
pub use web::{router, AppState};
