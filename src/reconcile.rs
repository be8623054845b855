use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::detection::{Detection, DetectionId, DetectionStatus, LifeStage};

// ── Change Reconciliation ───────────────────────────────────────────────────

/// Wire payload for a detection that has never been persisted. Strips
/// identity and audit fields; the original-* pair is seeded from the
/// current values at creation time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub upload_id: String,
    pub label: LifeStage,
    pub original_label: LifeStage,
    pub confidence: f32,
    pub original_confidence: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub status: DetectionStatus,
}

/// Wire payload for an in-place update: the identifier plus the new
/// values of every compared field, nothing else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionPatch {
    pub id: DetectionId,
    pub label: LifeStage,
    pub confidence: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub status: DetectionStatus,
}

/// The minimal three-way change set a save sends in one round trip.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<NewDetection>,
    pub modified: Vec<DetectionPatch>,
    pub deleted: Vec<DetectionId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

fn new_payload(det: &Detection, upload_id: &str) -> NewDetection {
    NewDetection {
        upload_id: upload_id.to_string(),
        label: det.label,
        original_label: det.label,
        confidence: det.confidence,
        original_confidence: det.confidence,
        x_min: det.x_min,
        y_min: det.y_min,
        x_max: det.x_max,
        y_max: det.y_max,
        status: det.status,
    }
}

fn patch_payload(det: &Detection, id: &str) -> DetectionPatch {
    DetectionPatch {
        id: id.to_string(),
        label: det.label,
        confidence: det.confidence,
        x_min: det.x_min,
        y_min: det.y_min,
        x_max: det.x_max,
        y_max: det.y_max,
        status: det.status,
    }
}

/// Field-by-field comparison on exactly the patched set. Numeric fields
/// use exact equality; any rounding must happen before the working set
/// reaches this point, or spurious writes follow.
fn differs(cur: &Detection, base: &Detection) -> bool {
    cur.label != base.label
        || cur.confidence != base.confidence
        || cur.x_min != base.x_min
        || cur.y_min != base.y_min
        || cur.x_max != base.x_max
        || cur.y_max != base.y_max
        || cur.status != base.status
}

/// Diff the working set against the persisted baseline.
///
/// A current detection without an identifier, or with one the baseline
/// does not know, is added. A baseline identifier missing from the
/// working set is deleted. Anything present on both sides is compared
/// field-by-field and emitted as a patch only when something changed.
/// Output order follows the inputs; the function is pure and total.
pub fn reconcile(current: &[Detection], original: &[Detection], upload_id: &str) -> ChangeSet {
    let baseline: HashMap<&str, &Detection> = original
        .iter()
        .filter_map(|d| d.id.as_deref().map(|id| (id, d)))
        .collect();
    let kept: HashSet<&str> = current.iter().filter_map(|d| d.id.as_deref()).collect();

    let mut changes = ChangeSet::default();
    for det in current {
        match det.id.as_deref().and_then(|id| baseline.get(id).map(|b| (id, *b))) {
            None => changes.added.push(new_payload(det, upload_id)),
            Some((id, base)) => {
                if differs(det, base) {
                    changes.modified.push(patch_payload(det, id));
                }
            }
        }
    }
    for det in original {
        if let Some(id) = det.id.as_deref() {
            if !kept.contains(id) {
                changes.deleted.push(id.to_string());
            }
        }
    }
    changes
}
