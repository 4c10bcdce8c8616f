// src/services/gemini_service.rs
use crate::errors::FacemapError;
use crate::models::{AnalysisResult, CapturedImage, FaceShape, StyleTips};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ANALYSIS_MODEL: &str = "gemini-3-flash-preview";
const INSPIRATION_MODEL: &str = "gemini-2.5-flash-image";
const REQUEST_TIMEOUT_SECS: u64 = 120;

const ANALYSIS_PROMPT: &str = "\
Analyze this human face image and determine its face shape (Oval, Round, Square, Heart, Diamond, or Oblong).
Identify key facial landmarks for the overlay:
- hairline_top
- forehead_left, forehead_right
- cheekbone_left, cheekbone_right
- jaw_left, jaw_right
- chin_bottom

Return the analysis in valid JSON format. Provide coordinates (x, y) as percentages (0-100) relative to the image dimensions.";

/// Seam between the orchestration layer and the remote model, so the state
/// machine can be exercised without network access.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Primary classification call. Errors here surface to the user.
    async fn analyze_face(&self, image: &CapturedImage) -> Result<AnalysisResult, FacemapError>;

    /// Best-effort inspiration-portrait generation. Returns a data URI.
    async fn generate_inspiration(
        &self,
        shape: FaceShape,
        tips: &StyleTips,
    ) -> Result<String, FacemapError>;
}

pub struct GeminiService {
    api_key: Option<String>,
    client: Client,
}

impl GeminiService {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { api_key, client }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()))
    }

    fn key(&self) -> Result<&str, FacemapError> {
        self.api_key.as_deref().ok_or(FacemapError::MissingCredential)
    }

    async fn generate_content(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<GenerateContentResponse, FacemapError> {
        let key = self.key()?;
        let url = format!("{BASE_URL}/models/{model}:generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FacemapError::Network(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FacemapError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(FacemapError::Network(format!(
                "Gemini API error ({status}): {detail}"
            )));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            FacemapError::MalformedResponse(format!("unparseable response envelope: {e}"))
        })?;

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(FacemapError::Network(format!(
                "content blocked by safety filters: {reason}"
            )));
        }

        Ok(parsed)
    }
}

#[async_trait]
impl FaceAnalyzer for GeminiService {
    async fn analyze_face(&self, image: &CapturedImage) -> Result<AnalysisResult, FacemapError> {
        let base64_image = general_purpose::STANDARD.encode(&image.data);

        let body = json!({
            "contents": [{
                "parts": [
                    { "inlineData": { "mimeType": "image/jpeg", "data": base64_image } },
                    { "text": ANALYSIS_PROMPT }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": analysis_schema()
            }
        });

        let response = self.generate_content(ANALYSIS_MODEL, body).await?;
        let text = response.first_text().ok_or_else(|| {
            FacemapError::MalformedResponse("no text part in model response".to_string())
        })?;

        parse_analysis(&text)
    }

    async fn generate_inspiration(
        &self,
        shape: FaceShape,
        tips: &StyleTips,
    ) -> Result<String, FacemapError> {
        let prompt = format!(
            "Create a professional, high-fashion aesthetic portrait of a person with a perfectly {shape} face shape.\n\
             Styling instructions to incorporate:\n\
             - Hair: {}\n\
             - Eyewear: {}\n\
             The style should be clean, modern, and provide visual inspiration for grooming and fashion.\n\
             Focus on the facial structure and how the styling complements it. Soft studio lighting.",
            tips.hair, tips.glasses
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "imageConfig": { "aspectRatio": "3:4" }
            }
        });

        let response = self.generate_content(INSPIRATION_MODEL, body).await?;
        response
            .first_inline_image()
            .map(|(mime, data)| format!("data:{mime};base64,{data}"))
            .ok_or(FacemapError::NoImageProduced)
    }
}

/// Structured-output schema requested from the classification call. Mirrors
/// the shape validated by `parse_analysis`.
fn analysis_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "shape": { "type": "STRING", "description": "One of: Oval, Round, Square, Heart, Diamond, Oblong" },
            "confidence": { "type": "NUMBER", "description": "Confidence score between 0 and 1" },
            "description": { "type": "STRING", "description": "Short clinical description of the face structure" },
            "landmarks": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": { "type": "STRING" },
                        "x": { "type": "NUMBER" },
                        "y": { "type": "NUMBER" }
                    },
                    "required": ["label", "x", "y"]
                }
            },
            "tips": {
                "type": "OBJECT",
                "properties": {
                    "glasses": { "type": "STRING" },
                    "hair": { "type": "STRING" },
                    "makeup": { "type": "STRING" }
                },
                "required": ["glasses", "hair", "makeup"]
            }
        },
        "required": ["shape", "confidence", "description", "landmarks", "tips"]
    })
}

/// Strict parse of the classification body. A missing required field or a
/// `shape` outside the enumeration is a hard failure, never a partial result.
fn parse_analysis(text: &str) -> Result<AnalysisResult, FacemapError> {
    serde_json::from_str(text).map_err(|e| FacemapError::MalformedResponse(e.to_string()))
}

// ---- Gemini REST envelope ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default = "default_mime")]
    mime_type: String,
    data: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<String> {
        self.candidates
            .as_deref()?
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.text.clone())
    }

    fn first_inline_image(&self) -> Option<(String, String)> {
        self.candidates
            .as_deref()?
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| {
                p.inline_data
                    .as_ref()
                    .map(|d| (d.mime_type.clone(), d.data.clone()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    const VALID_BODY: &str = r#"{
        "shape": "Oval",
        "confidence": 0.87,
        "description": "Balanced proportions with a slightly narrower chin.",
        "landmarks": [{"label": "chin_bottom", "x": 50.0, "y": 95.0}],
        "tips": {"glasses": "wide frames", "hair": "long waves", "makeup": "highlight center"}
    }"#;

    #[test]
    fn parse_analysis_accepts_valid_body() {
        let result = parse_analysis(VALID_BODY).unwrap();
        assert_eq!(result.shape, FaceShape::Oval);
        assert_eq!(result.confidence, 0.87);
        assert_eq!(result.landmarks.len(), 1);
        assert_eq!(result.landmarks[0].label, "chin_bottom");
        assert!(result.inspiration_image.is_none());
    }

    #[test]
    fn parse_analysis_rejects_missing_tips() {
        let body = r#"{
            "shape": "Oval",
            "confidence": 0.87,
            "description": "x",
            "landmarks": []
        }"#;
        let err = parse_analysis(body).unwrap_err();
        assert!(matches!(err, FacemapError::MalformedResponse(_)));
    }

    #[test]
    fn parse_analysis_rejects_shape_outside_enumeration() {
        let body = VALID_BODY.replace("Oval", "Triangular");
        let err = parse_analysis(&body).unwrap_err();
        assert!(matches!(err, FacemapError::MalformedResponse(_)));
    }

    #[test]
    fn parse_analysis_passes_out_of_range_coordinates_through() {
        let body = r#"{
            "shape": "Square",
            "confidence": 0.5,
            "description": "x",
            "landmarks": [{"label": "jaw_left", "x": -12.0, "y": 140.0}],
            "tips": {"glasses": "a", "hair": "b", "makeup": "c"}
        }"#;
        let result = parse_analysis(body).unwrap();
        assert_eq!(result.landmarks[0].x, -12.0);
        assert_eq!(result.landmarks[0].y, 140.0);
    }

    #[test]
    fn parse_analysis_tolerates_duplicate_landmark_labels() {
        let body = r#"{
            "shape": "Heart",
            "confidence": 0.6,
            "description": "x",
            "landmarks": [
                {"label": "jaw_left", "x": 10.0, "y": 70.0},
                {"label": "jaw_left", "x": 12.0, "y": 72.0}
            ],
            "tips": {"glasses": "a", "hair": "b", "makeup": "c"}
        }"#;
        let result = parse_analysis(body).unwrap();
        assert_eq!(result.landmarks.len(), 2);
    }

    #[test]
    fn envelope_extracts_first_text_part() {
        let envelope: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.first_text().as_deref(), Some("{}"));
    }

    #[test]
    fn envelope_extracts_inline_image_with_mime() {
        let envelope: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "QUJD"}}
            ]}}]}"#,
        )
        .unwrap();
        let (mime, data) = envelope.first_inline_image().unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, "QUJD");
    }

    #[test]
    fn envelope_without_candidates_yields_nothing() {
        let envelope: GenerateContentResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(envelope.first_text().is_none());
        assert!(envelope.first_inline_image().is_none());
    }

    #[tokio::test]
    async fn missing_credential_fails_without_network_call() {
        let service = GeminiService::new(None);
        let image = CapturedImage::new(vec![0xff, 0xd8], Provenance::Uploaded);
        let err = service.analyze_face(&image).await.unwrap_err();
        assert!(matches!(err, FacemapError::MissingCredential));

        let tips = StyleTips {
            glasses: "a".into(),
            hair: "b".into(),
            makeup: "c".into(),
        };
        let err = service
            .generate_inspiration(FaceShape::Oval, &tips)
            .await
            .unwrap_err();
        assert!(matches!(err, FacemapError::MissingCredential));
    }
}
