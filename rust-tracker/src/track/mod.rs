//! Email tracking core: domain model, correlation, status state machine and
//! the persistence seam.
//!
//! ## Flow
//!
//! ```text
//! NormalizedEvent → LogStore::ingest → resolve (message_id, aws fallback)
//!                                    → status::apply_event
//!                                    → append EmailEvent audit row
//! ```

pub mod log;
pub mod memory;
pub mod status;
pub mod store;

pub use log::{
    EmailEvent, EmailLog, EmailStatus, EventDetail, EventKind, NewEmailLog, NormalizedEvent,
};
pub use memory::MemoryStore;
pub use status::{apply_event, candidate_status, ApplyOutcome};
pub use store::{IngestOutcome, LogStore, SendRecord, StoreError};
