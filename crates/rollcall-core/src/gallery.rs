//! Enrolled-identity gallery: an immutable snapshot loaded from a JSON file.
//!
//! The snapshot is validated once at load and never mutated while serving.
//! Reload installs a new fully-formed snapshot behind [`GalleryHandle`];
//! in-flight match calls keep the snapshot they started with.

use crate::types::EnrolledIdentity;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery snapshot not found: {0}")]
    NotFound(String),
    #[error("gallery snapshot parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("threshold must be finite and positive, got {0}")]
    BadThreshold(f32),
    #[error("identity '{label}' has no enrolled vectors")]
    EmptyIdentity { label: String },
    #[error("identity '{label}' vector {index} has dimension {got}, expected {expected}")]
    DimensionMismatch {
        label: String,
        index: usize,
        got: usize,
        expected: usize,
    },
    #[error("duplicate label '{0}' in snapshot")]
    DuplicateLabel(String),
}

/// Immutable set of enrolled identities plus the matching parameters that
/// were fixed when the snapshot was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    /// Identities in enrollment order. Order is load-bearing: the matcher's
    /// tie-break picks the first vector encountered.
    pub identities: Vec<EnrolledIdentity>,
    /// Maximum acceptable Euclidean distance for a positive match.
    pub threshold: f32,
    /// Expected dimensionality of every enrolled and probe vector.
    pub embedding_dim: usize,
    /// Extractor version the snapshot was built with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Gallery {
    /// An empty gallery — every probe classifies as unknown.
    pub fn empty(threshold: f32, embedding_dim: usize) -> Self {
        Self {
            identities: Vec::new(),
            threshold,
            embedding_dim,
            model_version: None,
        }
    }

    /// Load and validate a snapshot from a JSON file.
    ///
    /// Failure here is fatal to service start — there is nothing to match
    /// against without a gallery.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        if !path.exists() {
            return Err(GalleryError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let gallery: Gallery = serde_json::from_str(&raw)?;
        gallery.validate()?;

        tracing::info!(
            path = %path.display(),
            identities = gallery.identities.len(),
            vectors = gallery.vector_count(),
            threshold = gallery.threshold,
            dim = gallery.embedding_dim,
            "gallery snapshot loaded"
        );
        Ok(gallery)
    }

    /// Total number of enrolled vectors across all identities.
    pub fn vector_count(&self) -> usize {
        self.identities.iter().map(|i| i.vectors.len()).sum()
    }

    /// Override the matching threshold, with the same finite-and-positive
    /// validation that [`load`](Self::load) applies to the snapshot's own
    /// value. A negative or NaN threshold would break the confidence
    /// formula's [0, 1] range.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), GalleryError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(GalleryError::BadThreshold(threshold));
        }
        self.threshold = threshold;
        Ok(())
    }

    fn validate(&self) -> Result<(), GalleryError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(GalleryError::BadThreshold(self.threshold));
        }

        let mut seen = std::collections::HashSet::new();
        for identity in &self.identities {
            if !seen.insert(identity.label.as_str()) {
                return Err(GalleryError::DuplicateLabel(identity.label.clone()));
            }
            if identity.vectors.is_empty() {
                return Err(GalleryError::EmptyIdentity {
                    label: identity.label.clone(),
                });
            }
            for (index, vector) in identity.vectors.iter().enumerate() {
                if vector.values.len() != self.embedding_dim {
                    return Err(GalleryError::DimensionMismatch {
                        label: identity.label.clone(),
                        index,
                        got: vector.values.len(),
                        expected: self.embedding_dim,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Shared handle to the current gallery snapshot.
///
/// Readers take a cheap `Arc` clone and match against the snapshot they saw;
/// [`swap`](Self::swap) installs a replacement for subsequent readers.
/// In-flight matches never observe a partially updated gallery.
#[derive(Clone)]
pub struct GalleryHandle {
    inner: Arc<RwLock<Arc<Gallery>>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(gallery))),
        }
    }

    /// Current snapshot. Lock is held only for the `Arc` clone.
    pub fn snapshot(&self) -> Arc<Gallery> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            // A panic while holding the lock can only poison it between two
            // pointer-sized reads/writes; the stored Arc is always intact.
            Err(poisoned) => Arc::clone(poisoned.get_ref()),
        }
    }

    /// Atomically replace the snapshot. The gallery must already be
    /// validated (it came from [`Gallery::load`] or a test fixture).
    pub fn swap(&self, gallery: Gallery) {
        let fresh = Arc::new(gallery);
        match self.inner.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}
