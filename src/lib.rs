// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod change_detector;
pub mod config;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod notify;
pub mod parse;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod sources;
pub mod state;
pub mod workers;

// ---- Re-exports for stable public API ----
pub use crate::config::DigestConfig;
pub use crate::fetch::types::{FetchOutcome, RawDelta, SourceFetcher, VersionMarker};
pub use crate::notify::Transport;
pub use crate::parse::{Category, ReleaseParser, StructuredRecord};
pub use crate::pipeline::{PipelineDriver, PipelineSettings, RunOutcome, RunPhase, RunReport};
pub use crate::render::RenderedChunk;
pub use crate::sources::{SourceCatalog, SourceDescriptor, SourceKind};
pub use crate::state::{SeenState, StateStore};
