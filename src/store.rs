use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::detection::{Detection, DetectionStatus};
use crate::reconcile::{ChangeSet, NewDetection};

// ── Persistence Boundary ────────────────────────────────────────────────────

/// The backing store a save hands its change set to. `apply` is
/// all-or-nothing: either every add/patch/delete lands, or the store is
/// untouched and an error comes back.
pub trait DetectionStore {
    fn load(&self, upload_id: &str) -> Result<Vec<Detection>>;
    fn apply(&mut self, upload_id: &str, changes: &ChangeSet) -> Result<Vec<Detection>>;
}

#[derive(Serialize, Deserialize, Default)]
struct DetectionFile {
    next_id: u64,
    detections: Vec<Detection>,
}

/// JSON sidecar store: detections for `photo.jpg` live in
/// `photo.jpg.detz` next to it. Deleted records stay in the file as
/// tombstones; `load` filters them out.
pub struct SidecarStore {
    path: PathBuf,
}

/// Temp name for atomic writes. Appends to the full file name rather
/// than swapping the last extension, so stores that differ only by
/// extension never share a temp file.
fn tmp_path(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        "{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ))
}

fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension(format!(
        "{}.detz",
        image_path
            .extension()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("")
    ))
}

impl SidecarStore {
    pub fn for_image(image_path: &Path) -> Self {
        Self {
            path: sidecar_path(image_path),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<DetectionFile> {
        if !self.path.exists() {
            return Ok(DetectionFile::default());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Write through a temp file and rename, so a crash mid-write never
    /// leaves a half-written sidecar.
    fn write_file(&self, file: &DetectionFile) -> Result<()> {
        let data = serde_json::to_string_pretty(file)?;
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, data).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

fn materialize(payload: &NewDetection, id: u64, now: &str) -> Detection {
    Detection {
        id: Some(id.to_string()),
        upload_id: payload.upload_id.clone(),
        label: payload.label,
        original_label: payload.original_label,
        confidence: payload.confidence,
        original_confidence: payload.original_confidence,
        x_min: payload.x_min,
        y_min: payload.y_min,
        x_max: payload.x_max,
        y_max: payload.y_max,
        status: payload.status,
        created_by: None,
        last_modified_by: None,
        created_at: Some(now.to_string()),
        updated_at: Some(now.to_string()),
        deleted_at: None,
    }
}

impl DetectionStore for SidecarStore {
    fn load(&self, upload_id: &str) -> Result<Vec<Detection>> {
        let file = self.read_file()?;
        Ok(file
            .detections
            .into_iter()
            .filter(|d| d.deleted_at.is_none() && d.upload_id == upload_id)
            .collect())
    }

    fn apply(&mut self, upload_id: &str, changes: &ChangeSet) -> Result<Vec<Detection>> {
        let mut file = self.read_file()?;
        let now = Utc::now().to_rfc3339();

        // Validate every referenced id before mutating anything.
        for patch in &changes.modified {
            if !file
                .detections
                .iter()
                .any(|d| d.id.as_deref() == Some(patch.id.as_str()) && d.deleted_at.is_none())
            {
                bail!("patch references unknown detection {}", patch.id);
            }
        }
        for id in &changes.deleted {
            if !file
                .detections
                .iter()
                .any(|d| d.id.as_deref() == Some(id.as_str()) && d.deleted_at.is_none())
            {
                bail!("delete references unknown detection {id}");
            }
        }

        for patch in &changes.modified {
            let det = file
                .detections
                .iter_mut()
                .find(|d| d.id.as_deref() == Some(patch.id.as_str()))
                .context("patched detection vanished")?;
            det.label = patch.label;
            det.confidence = patch.confidence;
            det.x_min = patch.x_min;
            det.y_min = patch.y_min;
            det.x_max = patch.x_max;
            det.y_max = patch.y_max;
            det.status = patch.status;
            det.updated_at = Some(now.clone());
        }
        for id in &changes.deleted {
            let det = file
                .detections
                .iter_mut()
                .find(|d| d.id.as_deref() == Some(id.as_str()))
                .context("deleted detection vanished")?;
            det.status = DetectionStatus::UserDeleted;
            det.deleted_at = Some(now.clone());
            det.updated_at = Some(now.clone());
        }
        for payload in &changes.added {
            file.next_id += 1;
            let det = materialize(payload, file.next_id, &now);
            file.detections.push(det);
        }

        self.write_file(&file)?;
        log::info!(
            "applied {} adds, {} patches, {} deletes to {}",
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len(),
            self.path.display()
        );
        self.load(upload_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::LifeStage;
    use crate::reconcile::DetectionPatch;
    use tempfile::TempDir;

    const UPLOAD: &str = "photo.jpg";

    fn store_in(dir: &TempDir) -> SidecarStore {
        SidecarStore::for_image(&dir.path().join("photo.jpg"))
    }

    fn payload(label: LifeStage) -> NewDetection {
        NewDetection {
            upload_id: UPLOAD.to_string(),
            label,
            original_label: label,
            confidence: 0.8,
            original_confidence: 0.8,
            x_min: 10.0,
            y_min: 20.0,
            x_max: 30.0,
            y_max: 40.0,
            status: DetectionStatus::ModelGenerated,
        }
    }

    fn adds(payloads: Vec<NewDetection>) -> ChangeSet {
        ChangeSet {
            added: payloads,
            ..ChangeSet::default()
        }
    }

    #[test]
    fn missing_sidecar_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load(UPLOAD).unwrap().is_empty());
    }

    #[test]
    fn sidecar_lands_next_to_the_image() {
        let store = SidecarStore::for_image(Path::new("/cases/photo.jpg"));
        assert_eq!(store.path(), Path::new("/cases/photo.jpg.detz"));
    }

    #[test]
    fn temp_path_appends_to_the_whole_file_name() {
        assert_eq!(
            tmp_path(Path::new("/cases/photo.jpg.detz")),
            Path::new("/cases/photo.jpg.detz.tmp")
        );
        // Overridden store paths that differ only by extension must not
        // collide on one temp file.
        assert_eq!(tmp_path(Path::new("/cases/a.json")), Path::new("/cases/a.json.tmp"));
        assert_eq!(tmp_path(Path::new("/cases/a.txt")), Path::new("/cases/a.txt.tmp"));
    }

    #[test]
    fn override_store_with_foreign_extension_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let mut store = SidecarStore::at(path.clone());
        store.apply(UPLOAD, &adds(vec![payload(LifeStage::Adult)])).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("session.json.tmp").exists());
        assert_eq!(SidecarStore::at(path).load(UPLOAD).unwrap().len(), 1);
    }

    #[test]
    fn added_detections_get_sequential_ids_and_timestamps() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let snapshot = store
            .apply(UPLOAD, &adds(vec![payload(LifeStage::Adult), payload(LifeStage::Pupa)]))
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id.as_deref(), Some("1"));
        assert_eq!(snapshot[1].id.as_deref(), Some("2"));
        assert!(snapshot[0].created_at.is_some());
        assert!(snapshot[0].updated_at.is_some());
        assert!(snapshot[0].deleted_at.is_none());
    }

    #[test]
    fn snapshot_survives_a_reload() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let written = store.apply(UPLOAD, &adds(vec![payload(LifeStage::Instar2)])).unwrap();
        let reread = store_in(&dir).load(UPLOAD).unwrap();
        assert_eq!(written, reread);
    }

    #[test]
    fn patches_update_only_the_compared_fields() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let snapshot = store.apply(UPLOAD, &adds(vec![payload(LifeStage::Adult)])).unwrap();
        let created_at = snapshot[0].created_at.clone();

        let patch = DetectionPatch {
            id: "1".to_string(),
            label: LifeStage::Pupa,
            confidence: 0.95,
            x_min: 11.0,
            y_min: 21.0,
            x_max: 31.0,
            y_max: 41.0,
            status: DetectionStatus::UserModified,
        };
        let changes = ChangeSet {
            modified: vec![patch],
            ..ChangeSet::default()
        };
        let after = store.apply(UPLOAD, &changes).unwrap();
        assert_eq!(after[0].label, LifeStage::Pupa);
        assert_eq!(after[0].status, DetectionStatus::UserModified);
        assert_eq!(after[0].x_min, 11.0);
        // Audit and original-* fields are the store's, not the patch's.
        assert_eq!(after[0].original_label, LifeStage::Adult);
        assert_eq!(after[0].created_at, created_at);
    }

    #[test]
    fn deletes_tombstone_instead_of_erasing() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store
            .apply(UPLOAD, &adds(vec![payload(LifeStage::Adult), payload(LifeStage::Pupa)]))
            .unwrap();
        let changes = ChangeSet {
            deleted: vec!["1".to_string()],
            ..ChangeSet::default()
        };
        let after = store.apply(UPLOAD, &changes).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id.as_deref(), Some("2"));

        // The tombstone stays in the file body.
        let raw = fs::read_to_string(store.path()).unwrap();
        let file: DetectionFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(file.detections.len(), 2);
        let dead = file
            .detections
            .iter()
            .find(|d| d.id.as_deref() == Some("1"))
            .unwrap();
        assert_eq!(dead.status, DetectionStatus::UserDeleted);
        assert!(dead.deleted_at.is_some());
    }

    #[test]
    fn unknown_patch_id_fails_without_touching_the_file() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.apply(UPLOAD, &adds(vec![payload(LifeStage::Adult)])).unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        let changes = ChangeSet {
            modified: vec![DetectionPatch {
                id: "404".to_string(),
                label: LifeStage::Pupa,
                confidence: 0.5,
                x_min: 0.0,
                y_min: 0.0,
                x_max: 1.0,
                y_max: 1.0,
                status: DetectionStatus::UserModified,
            }],
            deleted: vec!["1".to_string()],
            ..ChangeSet::default()
        };
        assert!(store.apply(UPLOAD, &changes).is_err());
        // The valid delete in the same batch must not have landed either.
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn unknown_delete_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let changes = ChangeSet {
            deleted: vec!["7".to_string()],
            ..ChangeSet::default()
        };
        assert!(store.apply(UPLOAD, &changes).is_err());
    }

    #[test]
    fn ids_are_never_reused_after_a_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.apply(UPLOAD, &adds(vec![payload(LifeStage::Adult)])).unwrap();
        store
            .apply(
                UPLOAD,
                &ChangeSet {
                    deleted: vec!["1".to_string()],
                    ..ChangeSet::default()
                },
            )
            .unwrap();
        let snapshot = store.apply(UPLOAD, &adds(vec![payload(LifeStage::Pupa)])).unwrap();
        assert_eq!(snapshot[0].id.as_deref(), Some("2"));
    }

    #[test]
    fn load_filters_other_uploads() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        let mut other = payload(LifeStage::Adult);
        other.upload_id = "other.jpg".to_string();
        store
            .apply(UPLOAD, &adds(vec![payload(LifeStage::Pupa), other]))
            .unwrap();
        let loaded = store.load(UPLOAD).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].upload_id, UPLOAD);
    }
}

