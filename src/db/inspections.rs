//! Inspection records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of inspection being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InspectionType {
    #[default]
    General,
    PrePurchase,
    PreListing,
    NewConstruction,
    Warranty,
}

impl InspectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionType::General => "general",
            InspectionType::PrePurchase => "pre_purchase",
            InspectionType::PreListing => "pre_listing",
            InspectionType::NewConstruction => "new_construction",
            InspectionType::Warranty => "warranty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "general" => Some(InspectionType::General),
            "pre_purchase" => Some(InspectionType::PrePurchase),
            "pre_listing" => Some(InspectionType::PreListing),
            "new_construction" => Some(InspectionType::NewConstruction),
            "warranty" => Some(InspectionType::Warranty),
            _ => None,
        }
    }
}

/// A property inspection session.
///
/// Stored as a whole record: every change is a read-modify-write of the full
/// value followed by `put_inspection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub id: String,
    pub address: String,
    pub inspector_name: Option<String>,
    pub client_name: Option<String>,
    pub inspection_type: InspectionType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ids of owned photos, in the order they were added.
    pub photo_ids: Vec<String>,
    pub completed: bool,
}

impl Inspection {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        inspection_type: InspectionType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            inspector_name: None,
            client_name: None,
            inspection_type,
            created_at: now,
            updated_at: now,
            photo_ids: Vec::new(),
            completed: false,
        }
    }

    /// Append a photo id. Returns false if it was already listed.
    pub fn add_photo_id(&mut self, photo_id: &str) -> bool {
        if self.photo_ids.iter().any(|id| id == photo_id) {
            return false;
        }
        self.photo_ids.push(photo_id.to_string());
        true
    }

    /// Remove a photo id. Returns false if it was not listed.
    pub fn remove_photo_id(&mut self, photo_id: &str) -> bool {
        let before = self.photo_ids.len();
        self.photo_ids.retain(|id| id != photo_id);
        self.photo_ids.len() != before
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
