//! Search-and-cache synchronization for an annotated image corpus.
//!
//! This crate provides:
//! - A small query language compiled to a boolean operator tree
//! - Decoding of the binary search response format
//! - An identity-preserving cache of images and interned tags
//! - A search session that ignores stale responses
//! - Confirmed tag toggles (with implication closure) and attribute writes
//! - A clamped navigation cursor with look-ahead hydration

pub mod annotate;
pub mod api;
pub mod bus;
pub mod cache;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod navigation;
pub mod query;
pub mod search;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use annotate::{AnnotationMutator, AttributeWrite, ToggleDirection, ToggleReport};
pub use api::{ApiClient, ApiRequest, HttpTransport, RawResponse, Transport};
pub use bus::Bus;
pub use cache::{EntityCache, Image, Tag, TagRegistry};
pub use codec::{decode, SearchResponse};
pub use config::ClientConfig;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use event::SyncEvent;
pub use navigation::NavigationCursor;
pub use query::{compile, CompiledQuery, Operator};
pub use search::{SearchOutcome, SearchSession};
pub use storage::{KvStore, SessionStore};
