//! Persistence for stampede test sessions.
//!
//! [`SessionStore`] keeps test configurations and their results in any [`ObjectStore`]
//! backend: [`LocalObjectStore`] on disk, or [`MemoryObjectStore`] for tests.

pub mod object_store;
pub mod session;
pub mod store;

pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectMetadata, ObjectStore};
pub use session::{
    content_hash, ExportFormat, FieldDifference, SearchResult, Session, SessionComparison,
    SessionMetadata, SessionStats, SessionSummary,
};
pub use store::SessionStore;
