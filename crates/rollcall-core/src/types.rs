use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-image pixel coordinates.
///
/// Produced by the external detector; the core carries it through to the
/// per-face report unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector (512-dimensional for the upstream extractor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "vggface2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled identity: a label plus every reference embedding captured
/// for it. Samples are kept individually — matching compares the probe
/// against each one, never against a centroid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    /// Enrollment label; ends in a fixed-width registration-number suffix
    /// (see [`crate::label`]).
    pub label: String,
    pub vectors: Vec<Embedding>,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Label of the matched identity (if any).
    pub label: Option<String>,
    /// Euclidean distance of the globally nearest enrolled vector.
    pub distance: f32,
    /// Normalized closeness in [0, 1]: `max(0, 1 - distance / threshold)`.
    /// Reported on rejection too, for diagnostics.
    pub confidence: f32,
}

impl MatchResult {
    /// The "nothing to compare against" result: empty gallery.
    pub fn unknown() -> Self {
        Self {
            matched: false,
            label: None,
            distance: f32::INFINITY,
            confidence: 0.0,
        }
    }
}
