//! Frame analysis — camera-frame integrity checks behind a trait seam.
//!
//! ERROR HANDLING
//! ==============
//! Analysis is infallible at the call site: a frame that cannot be decoded
//! or a backend that cannot be reached yields the `invalid_frame` verdict
//! (high severity, zero faces) instead of an error. Proctoring must keep a
//! conclusion for every submitted frame, so transport failures degrade to
//! the most suspicious defensible verdict rather than silence.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::Severity;

/// One violation found in a frame. A single frame can carry several (a face
/// turned away with eyes hidden is two).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameViolation {
    pub violation_type: String,
    pub severity: Severity,
    pub details: String,
}

/// Verdict for one analyzed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub violations: Vec<FrameViolation>,
    pub faces_detected: u32,
    #[serde(default)]
    pub head_pose: Option<String>,
    #[serde(default)]
    pub gaze_direction: Option<String>,
}

/// Verdict for a frame that could not be decoded or analyzed.
#[must_use]
pub fn invalid_frame_analysis() -> FrameAnalysis {
    FrameAnalysis {
        violations: vec![FrameViolation {
            violation_type: "invalid_frame".to_string(),
            severity: Severity::High,
            details: "frame could not be decoded".to_string(),
        }],
        faces_detected: 0,
        head_pose: None,
        gaze_direction: None,
    }
}

impl FrameAnalysis {
    /// A clean frame: no violations detected.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Analyzer seam. Implementations must not fail; see module docs.
#[async_trait]
pub trait AnalyzeFrames: Send + Sync {
    async fn analyze(&self, frame_base64: &str) -> FrameAnalysis;
}

// =============================================================================
// HTTP BACKEND
// =============================================================================

/// Analyzer backed by an external vision service.
pub struct HttpFrameAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    frame_base64: &'a str,
}

impl HttpFrameAnalyzer {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint }
    }

    /// Build from `FRAME_ANALYZER_URL`, if set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("FRAME_ANALYZER_URL").ok().map(Self::new)
    }
}

#[async_trait]
impl AnalyzeFrames for HttpFrameAnalyzer {
    async fn analyze(&self, frame_base64: &str) -> FrameAnalysis {
        // Validate the payload locally first: a frame the backend could not
        // decode anyway never leaves the process.
        let payload = frame_base64
            .rsplit_once(',')
            .map_or(frame_base64, |(_, data)| data);
        if base64::engine::general_purpose::STANDARD
            .decode(payload)
            .is_err()
        {
            return invalid_frame_analysis();
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { frame_base64: payload })
            .send()
            .await;

        match response {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<FrameAnalysis>().await {
                    Ok(analysis) => analysis,
                    Err(err) => {
                        warn!(error = %err, "frame analyzer returned malformed verdict");
                        invalid_frame_analysis()
                    }
                },
                Err(err) => {
                    warn!(error = %err, "frame analyzer rejected request");
                    invalid_frame_analysis()
                }
            },
            Err(err) => {
                warn!(error = %err, "frame analyzer unreachable");
                invalid_frame_analysis()
            }
        }
    }
}

#[cfg(test)]
#[path = "analysis_test.rs"]
mod tests;
