//! # Acqwatch Lifecycle
//!
//! Dataset lifecycle core: tracked items, the timer-driven orchestrator,
//! and the background index refresher.
//!
//! ## Pipeline
//!
//! ```text
//! Record source ──> IndexRefresher ──> RequestIndex generation (Arc swap)
//!                                            │
//! Discovery ──> Track command ──> LifecycleOrchestrator (periodic tick)
//!                                            │
//!                                  resolve / wait / finalize
//!                                            │
//!                              ArtifactGenerator ──> registration artifact
//! ```
//!
//! The orchestrator owns the tracked-item collection inside a single
//! select-loop task; the refresher publishes each index generation as a
//! whole, so lookups never observe a partial build. Both emit discrete
//! [`WatchEvent`]s for external observers.

mod collaborators;
mod error;
mod events;
mod item;
mod orchestrator;
mod policy;
mod refresher;

pub use collaborators::{
    ArtifactError, ArtifactGenerator, FileObservation, FsProbe, MetadataProbe, RecordSource,
    RequestRecord,
};
pub use error::{Result, WatchError};
pub use events::WatchEvent;
pub use item::{
    item_name, FailureReason, ItemSnapshot, ItemStatus, RequestMatch, TrackedItem, WaitProgress,
};
pub use orchestrator::LifecycleOrchestrator;
pub use policy::WatchPolicy;
pub use refresher::{IndexFeed, IndexRefresher, RefreshHealth};
