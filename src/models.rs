// src/models.rs
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of face-shape classes the remote model may return.
/// Any other value in a response is a schema violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceShape {
    Oval,
    Round,
    Square,
    Heart,
    Diamond,
    Oblong,
}

impl std::fmt::Display for FaceShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaceShape::Oval => "Oval",
            FaceShape::Round => "Round",
            FaceShape::Square => "Square",
            FaceShape::Heart => "Heart",
            FaceShape::Diamond => "Diamond",
            FaceShape::Oblong => "Oblong",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Landmark {
    pub label: String,
    /// Percent of image width as returned by the model. Not clamped to [0, 100].
    pub x: f64,
    /// Percent of image height. Same pass-through rule as `x`.
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleTips {
    pub glasses: String,
    pub hair: String,
    pub makeup: String,
}

/// Parsed classification response. Only ever constructed as a whole from a
/// schema-valid response body, never field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub shape: FaceShape,
    pub confidence: f64,
    pub description: String,
    pub landmarks: Vec<Landmark>,
    pub tips: StyleTips,
    /// Data URI of the generated inspiration portrait. Absent until the
    /// enrichment call succeeds; written at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspiration_image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Uploaded,
    Captured,
}

/// One encoded image ready for analysis, from either capture affordance.
/// Immutable once created; a new capture replaces it wholesale.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// JPEG-encoded pixels. `Bytes` keeps the clone handed to the in-flight
    /// analysis call cheap.
    pub data: Bytes,
    pub provenance: Provenance,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(data: Vec<u8>, provenance: Provenance) -> Self {
        Self {
            data: Bytes::from(data),
            provenance,
            captured_at: Utc::now(),
        }
    }

    pub fn data_uri(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            general_purpose::STANDARD.encode(&self.data)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    HasImage,
    Analyzing,
    Analyzed,
}

/// JSON projection of one session, as returned by the API.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    pub analyzing: bool,
    pub enriching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
