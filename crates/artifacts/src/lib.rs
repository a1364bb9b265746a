//! Persists files recovered from executed code and rewrites
//! `sandbox:/mnt/data/<name>` references in generated text to their
//! retrieval URLs.

mod bridge;
mod mime;
mod store;

pub use bridge::{rewrite_sandbox_references, ArtifactBridge, BridgeContext, UPLOAD_SOURCE};
pub use mime::{content_type_for, DEFAULT_CONTENT_TYPE};
pub use store::{FileStore, FileUpload, LocalArtifactStore, StoreError, StoredFile};
