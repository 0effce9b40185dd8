//! rollcall-core — Identity matching over an enrolled gallery.
//!
//! Consumes pre-computed face embeddings (produced by an external extractor)
//! and decides, per probe, which enrolled identity it belongs to. Pure
//! decision logic: no camera, no inference, no storage.

pub mod gallery;
pub mod label;
pub mod matcher;
pub mod types;

pub use gallery::{Gallery, GalleryError, GalleryHandle};
pub use label::{parse_registration_no, LabelError, DEFAULT_SUFFIX_WIDTH};
pub use matcher::{Matcher, NearestMatcher};
pub use types::{BoundingBox, Embedding, EnrolledIdentity, MatchResult};
