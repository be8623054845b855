use std::path::{Path, PathBuf};

use crate::viewport::Size;

// ── Image Load Session ──────────────────────────────────────────────────────

/// Tracks which image source the editor currently wants and whether its
/// natural dimensions have arrived.
///
/// Each load completion is tagged with the source it was issued for, so a
/// decode that finishes after the user has moved on is dropped instead of
/// overwriting the newer image's geometry.
#[derive(Debug, Default)]
pub struct ImageSession {
    active: Option<PathBuf>,
    loaded: Option<(PathBuf, Size)>,
}

impl ImageSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start loading `source`. Dimensions from any earlier request stop
    /// being visible immediately; boxes must not render against a stale
    /// image while the new one decodes.
    pub fn begin(&mut self, source: &Path) {
        self.active = Some(source.to_path_buf());
        self.loaded = None;
    }

    /// Record a successful decode. Returns false (and changes nothing)
    /// when `source` is no longer the active request.
    pub fn complete(&mut self, source: &Path, natural: Size) -> bool {
        if self.active.as_deref() != Some(source) {
            return false;
        }
        self.loaded = Some((source.to_path_buf(), natural));
        true
    }

    /// A failed decode leaves no dimensions; the resolver keeps yielding
    /// nothing until a later load succeeds.
    pub fn fail(&mut self, source: &Path) {
        if self.active.as_deref() == Some(source) {
            self.loaded = None;
        }
    }

    /// Natural dimensions of the active image, once decoded.
    pub fn natural(&self) -> Option<Size> {
        match (&self.active, &self.loaded) {
            (Some(active), Some((loaded, size))) if active == loaded => Some(*size),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(w: f32, h: f32) -> Size {
        Size::new(w, h)
    }

    #[test]
    fn dimensions_arrive_only_after_a_successful_load() {
        let mut s = ImageSession::new();
        assert!(s.natural().is_none());
        s.begin(Path::new("a.jpg"));
        assert!(s.natural().is_none());
        assert!(s.complete(Path::new("a.jpg"), size(1000.0, 500.0)));
        assert_eq!(s.natural(), Some(size(1000.0, 500.0)));
    }

    #[test]
    fn stale_completion_is_discarded() {
        let mut s = ImageSession::new();
        s.begin(Path::new("a.jpg"));
        s.begin(Path::new("b.jpg"));
        assert!(!s.complete(Path::new("a.jpg"), size(1000.0, 500.0)));
        assert!(s.natural().is_none());
        assert!(s.complete(Path::new("b.jpg"), size(640.0, 480.0)));
        assert_eq!(s.natural(), Some(size(640.0, 480.0)));
    }

    #[test]
    fn switching_images_hides_the_previous_dimensions() {
        let mut s = ImageSession::new();
        s.begin(Path::new("a.jpg"));
        s.complete(Path::new("a.jpg"), size(1000.0, 500.0));
        s.begin(Path::new("b.jpg"));
        assert!(s.natural().is_none());
    }

    #[test]
    fn failed_load_leaves_nothing_until_a_retry_succeeds() {
        let mut s = ImageSession::new();
        s.begin(Path::new("a.jpg"));
        s.fail(Path::new("a.jpg"));
        assert!(s.natural().is_none());
        s.begin(Path::new("a.jpg"));
        assert!(s.complete(Path::new("a.jpg"), size(800.0, 600.0)));
        assert_eq!(s.natural(), Some(size(800.0, 600.0)));
    }
}
