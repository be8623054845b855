use egui::Rect;
use serde::{Deserialize, Serialize};

use crate::viewport::Size;

// ── Data Model ──────────────────────────────────────────────────────────────

pub type DetectionId = String;
pub type UploadId = String;

/// Life-stage classification of one specimen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifeStage {
    #[serde(rename = "adult")]
    Adult,
    #[serde(rename = "instar_1")]
    Instar1,
    #[serde(rename = "instar_2")]
    Instar2,
    #[serde(rename = "instar_3")]
    Instar3,
    #[serde(rename = "pupa")]
    Pupa,
}

impl LifeStage {
    pub const ALL: [LifeStage; 5] = [
        LifeStage::Adult,
        LifeStage::Instar1,
        LifeStage::Instar2,
        LifeStage::Instar3,
        LifeStage::Pupa,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LifeStage::Adult => "adult",
            LifeStage::Instar1 => "instar 1",
            LifeStage::Instar2 => "instar 2",
            LifeStage::Instar3 => "instar 3",
            LifeStage::Pupa => "pupa",
        }
    }
}

/// Provenance of a detection, from first inference to user correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    ModelGenerated,
    UserVerified,
    UserModified,
    UserCreated,
    UserDeleted,
}

/// One bounding-box annotation of one specimen within one image.
///
/// Geometry is in the image's natural pixel space, never viewport pixels.
/// Audit fields are stamped by the store and treated as read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: Option<DetectionId>,
    pub upload_id: UploadId,
    pub label: LifeStage,
    pub original_label: LifeStage,
    pub confidence: f32,
    pub original_confidence: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub status: DetectionStatus,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

impl Detection {
    /// A box freshly drawn by the user; no identity until persisted.
    pub fn drawn(upload_id: &str, label: LifeStage, rect: Rect) -> Self {
        Self {
            id: None,
            upload_id: upload_id.to_string(),
            label,
            original_label: label,
            confidence: 1.0,
            original_confidence: 1.0,
            x_min: rect.min.x,
            y_min: rect.min.y,
            x_max: rect.max.x,
            y_max: rect.max.y,
            status: DetectionStatus::UserCreated,
            created_by: None,
            last_modified_by: None,
            created_at: None,
            updated_at: None,
            deleted_at: None,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::from_min_max(
            egui::pos2(self.x_min, self.y_min),
            egui::pos2(self.x_max, self.y_max),
        )
    }

    /// Replace the box, keeping min < max on both axes.
    pub fn set_rect(&mut self, rect: Rect) {
        let r = normalize(rect);
        self.x_min = r.min.x;
        self.y_min = r.min.y;
        self.x_max = r.max.x;
        self.y_max = r.max.y;
    }

    /// Shift the box by an image-space delta, clamped so it stays fully
    /// inside the image without changing size.
    pub fn translate(&mut self, delta: egui::Vec2, natural: Size) {
        let w = self.x_max - self.x_min;
        let h = self.y_max - self.y_min;
        let nx = (self.x_min + delta.x).clamp(0.0, (natural.width - w).max(0.0));
        let ny = (self.y_min + delta.y).clamp(0.0, (natural.height - h).max(0.0));
        self.x_min = nx;
        self.y_min = ny;
        self.x_max = nx + w;
        self.y_max = ny + h;
    }

    pub fn set_label(&mut self, label: LifeStage) {
        if self.label != label {
            self.label = label;
            self.mark_edited();
        }
    }

    /// Record that the user touched geometry or classification. Unsaved
    /// user-drawn boxes keep their created status.
    pub fn mark_edited(&mut self) {
        if self.status != DetectionStatus::UserCreated {
            self.status = DetectionStatus::UserModified;
        }
    }

    pub fn mark_verified(&mut self) {
        self.status = DetectionStatus::UserVerified;
    }

    pub fn is_verified(&self) -> bool {
        matches!(
            self.status,
            DetectionStatus::UserVerified | DetectionStatus::UserCreated | DetectionStatus::UserModified
        )
    }
}

/// Corner-order-independent rect.
pub fn normalize(rect: Rect) -> Rect {
    Rect::from_min_max(
        egui::pos2(rect.min.x.min(rect.max.x), rect.min.y.min(rect.max.y)),
        egui::pos2(rect.min.x.max(rect.max.x), rect.min.y.max(rect.max.y)),
    )
}

/// Clamp a drawn rect to the image bounds.
pub fn clamp_to_image(rect: Rect, natural: Size) -> Rect {
    let r = normalize(rect);
    Rect::from_min_max(
        egui::pos2(r.min.x.clamp(0.0, natural.width), r.min.y.clamp(0.0, natural.height)),
        egui::pos2(r.max.x.clamp(0.0, natural.width), r.max.y.clamp(0.0, natural.height)),
    )
}
