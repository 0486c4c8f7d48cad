//! Photo records and their AI analysis fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of the AI analysis for a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    #[default]
    Pending,
    Analyzing,
    Complete,
    Failed,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Analyzing => "analyzing",
            AiStatus::Complete => "complete",
            AiStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AiStatus::Pending),
            "analyzing" => Some(AiStatus::Analyzing),
            "complete" => Some(AiStatus::Complete),
            "failed" => Some(AiStatus::Failed),
            _ => None,
        }
    }
}

/// A text value that may be present in English, Spanish, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Bilingual {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub es: Option<String>,
}

impl Bilingual {
    pub fn en(text: impl Into<String>) -> Self {
        Self {
            en: Some(text.into()),
            es: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.en.is_none() && self.es.is_none()
    }
}

/// Result of the AI analysis of a photo. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AiFinding {
    #[serde(default)]
    pub title: Bilingual,
    #[serde(default)]
    pub severity: Bilingual,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub recommendation: Bilingual,
    #[serde(default)]
    pub category: Bilingual,
}

/// A captured photo, owned by exactly one inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub inspection_id: String,
    /// Free-form room label used for grouping in reports.
    pub room: String,
    pub captured_at: DateTime<Utc>,
    pub notes: String,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
    #[serde(skip)]
    pub full_image: Vec<u8>,
    pub ai_status: AiStatus,
    pub ai_result: Option<AiFinding>,
    /// Number of locally committed edits that must reach the remote.
    pub revision: u64,
}

impl Photo {
    pub fn new(
        id: impl Into<String>,
        inspection_id: impl Into<String>,
        room: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            inspection_id: inspection_id.into(),
            room: room.into(),
            captured_at,
            notes: String::new(),
            thumbnail: Vec::new(),
            full_image: Vec::new(),
            ai_status: AiStatus::Pending,
            ai_result: None,
            revision: 0,
        }
    }

    pub fn with_images(mut self, thumbnail: Vec<u8>, full_image: Vec<u8>) -> Self {
        self.thumbnail = thumbnail;
        self.full_image = full_image;
        self
    }

    /// Advance the revision for an edit that will be propagated remotely.
    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Sort photos newest first, the order the capture screens display them in.
pub fn sort_newest_first(photos: &mut [Photo]) {
    photos.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
}
