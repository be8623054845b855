use eframe::egui;
use image::DynamicImage;
use std::path::PathBuf;

use crate::detection::{clamp_to_image, Detection, LifeStage, UploadId};
use crate::reconcile::reconcile;
use crate::session::ImageSession;
use crate::store::{DetectionStore, SidecarStore};
use crate::viewport::{self, Handle, Size, ViewTransform};

// ── Interaction State ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum Tool {
    Select,
    Draw,
}

#[derive(Clone, Copy, Debug)]
enum DragState {
    None,
    Drawing { start_img: egui::Pos2 },
    Moving { index: usize },
    Resizing { index: usize, handle: Handle },
}

/// Box border thickness in natural pixels; drawn scaled by the current
/// contain-fit zoom, like every other image-space length.
const BOX_STROKE: f32 = 3.0;
/// Half-size of a drawn handle square.
const HANDLE_HALF: f32 = 4.0;
/// Pointer distance within which a handle grabs.
const HANDLE_HIT_RADIUS: f32 = 8.0;
/// Border band width for selecting a box by its outline.
const BORDER_BAND: f32 = 6.0;
/// Smallest box the editor keeps, in natural pixels.
const MIN_BOX: f32 = 2.0;

// ── App ─────────────────────────────────────────────────────────────────────

pub struct EditorApp {
    image_path: PathBuf,
    upload_id: UploadId,
    store: SidecarStore,

    session: ImageSession,
    raw_image: Option<DynamicImage>,
    texture: Option<egui::TextureHandle>,

    detections: Vec<Detection>,
    baseline: Vec<Detection>,
    undo_stack: Vec<Vec<Detection>>,
    redo_stack: Vec<Vec<Detection>>,

    tool: Tool,
    draw_label: LifeStage,
    drag: DragState,
    selected: Option<usize>,
    status_line: String,
}

impl EditorApp {
    pub fn new(image_path: PathBuf, store: SidecarStore) -> anyhow::Result<Self> {
        let upload_id: UploadId = image_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        let mut session = ImageSession::new();
        session.begin(&image_path);
        let raw_image = match image::open(&image_path) {
            Ok(img) => {
                session.complete(
                    &image_path,
                    Size::new(img.width() as f32, img.height() as f32),
                );
                Some(img)
            }
            Err(err) => {
                log::warn!("failed to decode {}: {err}", image_path.display());
                session.fail(&image_path);
                None
            }
        };

        let baseline = store.load(&upload_id)?;
        log::info!(
            "opened {} with {} detections",
            image_path.display(),
            baseline.len()
        );

        Ok(Self {
            image_path,
            upload_id,
            store,
            session,
            raw_image,
            texture: None,
            detections: baseline.clone(),
            baseline,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            tool: Tool::Select,
            draw_label: LifeStage::Adult,
            drag: DragState::None,
            selected: None,
            status_line: String::new(),
        })
    }

    pub fn title(&self) -> String {
        format!(
            "instar-edit — {}",
            self.image_path
                .file_name()
                .unwrap_or_default()
                .to_str()
                .unwrap_or("")
        )
    }

    fn push_undo(&mut self) {
        self.undo_stack.push(self.detections.clone());
        self.redo_stack.clear();
    }

    fn undo(&mut self) {
        if let Some(prev) = self.undo_stack.pop() {
            self.redo_stack.push(self.detections.clone());
            self.detections = prev;
            self.selected = None;
            self.drag = DragState::None;
        }
    }

    fn redo(&mut self) {
        if let Some(next) = self.redo_stack.pop() {
            self.undo_stack.push(self.detections.clone());
            self.detections = next;
            self.selected = None;
            self.drag = DragState::None;
        }
    }

    /// Diff the working set against the baseline and push the change set
    /// to the store in one call. A rejected save leaves the working set
    /// untouched so nothing the user drew is lost on retry.
    fn save(&mut self) {
        let changes = reconcile(&self.detections, &self.baseline, &self.upload_id);
        if changes.is_empty() {
            self.status_line = "nothing to save".to_string();
            return;
        }
        match self.store.apply(&self.upload_id, &changes) {
            Ok(snapshot) => {
                self.status_line = format!(
                    "saved: {} added, {} updated, {} removed",
                    changes.added.len(),
                    changes.modified.len(),
                    changes.deleted.len()
                );
                self.baseline = snapshot.clone();
                self.detections = snapshot;
                self.selected = None;
                self.undo_stack.clear();
                self.redo_stack.clear();
            }
            Err(err) => {
                log::warn!("save failed: {err:#}");
                self.status_line = format!("save failed: {err}");
            }
        }
    }

    fn delete_selected(&mut self) {
        if let Some(idx) = self.selected {
            if idx < self.detections.len() {
                self.push_undo();
                self.detections.remove(idx);
                self.selected = None;
                self.drag = DragState::None;
            }
        }
    }

    /// The keyboard block runs before the pointer block in the same
    /// frame, so a held drag can outlive its box; a stale index cancels
    /// the drag instead of indexing.
    fn move_box(&mut self, index: usize, delta: egui::Vec2, natural: Size) {
        match self.detections.get_mut(index) {
            Some(det) => {
                det.translate(delta, natural);
                det.mark_edited();
            }
            None => self.drag = DragState::None,
        }
    }

    fn resize_box(&mut self, index: usize, handle: Handle, img_pos: egui::Pos2) {
        match self.detections.get_mut(index) {
            Some(det) => {
                det.set_rect(handle.resize(det.rect(), img_pos, MIN_BOX));
                det.mark_edited();
            }
            None => self.drag = DragState::None,
        }
    }

    fn verify_selected(&mut self) {
        if let Some(idx) = self.selected {
            if idx < self.detections.len() {
                self.push_undo();
                self.detections[idx].mark_verified();
            }
        }
    }

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(ref img) = self.raw_image {
            let rgba = img.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            let pixels = rgba.as_flat_samples();
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
            self.texture =
                Some(ctx.load_texture("specimen", color_image, egui::TextureOptions::LINEAR));
        }
    }

    /// On-screen border thickness at the current zoom.
    fn stroke_width(t: &ViewTransform) -> f32 {
        BOX_STROKE * t.scale()
    }

    fn status_color(det: &Detection) -> egui::Color32 {
        use crate::detection::DetectionStatus::*;
        match det.status {
            ModelGenerated => egui::Color32::from_rgb(255, 160, 40),
            UserVerified => egui::Color32::from_rgb(60, 200, 90),
            UserModified => egui::Color32::from_rgb(240, 220, 70),
            UserCreated => egui::Color32::from_rgb(90, 170, 255),
            UserDeleted => egui::Color32::from_gray(120),
        }
    }

    fn draw_detections(&self, painter: &egui::Painter, t: &ViewTransform) {
        let stroke = Self::stroke_width(t);
        for (i, det) in self.detections.iter().enumerate() {
            let rect = t.rect_to_screen(det.rect());
            let color = Self::status_color(det);
            painter.rect_stroke(
                rect,
                0.0,
                egui::Stroke::new(stroke, color),
                egui::StrokeKind::Middle,
            );
            painter.text(
                rect.min + egui::vec2(2.0, -2.0),
                egui::Align2::LEFT_BOTTOM,
                format!("{} {:.0}%", det.label.name(), det.confidence * 100.0),
                egui::FontId::proportional(12.0),
                color,
            );
            if self.selected == Some(i) {
                painter.rect_stroke(
                    rect.expand(2.0),
                    2.0,
                    egui::Stroke::new(1.5, egui::Color32::from_rgb(0, 120, 255)),
                    egui::StrokeKind::Middle,
                );
                for handle in Handle::ALL {
                    let c = handle.center(rect, stroke);
                    painter.rect_filled(
                        egui::Rect::from_center_size(
                            c,
                            egui::vec2(HANDLE_HALF * 2.0, HANDLE_HALF * 2.0),
                        ),
                        0.0,
                        egui::Color32::WHITE,
                    );
                }
            }
        }
    }

    /// Border-band hit test in reverse z-order: the outline (not the
    /// interior) selects, so overlapping boxes stay reachable.
    fn hit_box(&self, t: &ViewTransform, pos: egui::Pos2) -> Option<usize> {
        let stroke = Self::stroke_width(t);
        for (i, det) in self.detections.iter().enumerate().rev() {
            let rect = t.rect_to_screen(det.rect());
            let expanded = rect.expand(stroke + BORDER_BAND);
            let shrunk = rect.shrink(stroke + BORDER_BAND);
            if expanded.contains(pos) && !shrunk.contains(pos) {
                return Some(i);
            }
        }
        None
    }

    fn clamp_img(pos: egui::Pos2, natural: Size) -> egui::Pos2 {
        egui::pos2(
            pos.x.clamp(0.0, natural.width),
            pos.y.clamp(0.0, natural.height),
        )
    }

    fn handle_pointer(
        &mut self,
        response: &egui::Response,
        ctx: &egui::Context,
        t: &ViewTransform,
        natural: Size,
    ) {
        let stroke = Self::stroke_width(t);

        // Resize cursor feedback over the selected box's handles.
        if let (Some(idx), Some(pos)) = (self.selected, response.hover_pos()) {
            if let Some(det) = self.detections.get(idx) {
                let rect = t.rect_to_screen(det.rect());
                if let Some(handle) = viewport::hit_handle(rect, stroke, pos, HANDLE_HIT_RADIUS) {
                    ctx.set_cursor_icon(handle.cursor());
                }
            }
        }

        if response.drag_started_by(egui::PointerButton::Primary) {
            if let Some(pos) = response.hover_pos() {
                match self.tool {
                    Tool::Draw => {
                        self.drag = DragState::Drawing {
                            start_img: Self::clamp_img(t.to_image(pos), natural),
                        };
                    }
                    Tool::Select => {
                        let grabbed = self.selected.and_then(|idx| {
                            let det = self.detections.get(idx)?;
                            let rect = t.rect_to_screen(det.rect());
                            viewport::hit_handle(rect, stroke, pos, HANDLE_HIT_RADIUS)
                                .map(|handle| (idx, handle))
                        });
                        if let Some((index, handle)) = grabbed {
                            self.push_undo();
                            self.drag = DragState::Resizing { index, handle };
                        } else if let Some(index) = self.hit_box(t, pos) {
                            self.selected = Some(index);
                            self.push_undo();
                            self.drag = DragState::Moving { index };
                        } else {
                            self.selected = None;
                        }
                    }
                }
            }
        }

        if response.dragged_by(egui::PointerButton::Primary) {
            match self.drag {
                DragState::Moving { index } => {
                    let delta_img = response.drag_delta() / t.scale();
                    self.move_box(index, delta_img, natural);
                }
                DragState::Resizing { index, handle } => {
                    if let Some(pos) = response.hover_pos() {
                        let img = Self::clamp_img(t.to_image(pos), natural);
                        self.resize_box(index, handle, img);
                    }
                }
                _ => {}
            }
        }

        if response.drag_stopped_by(egui::PointerButton::Primary) {
            if let DragState::Drawing { start_img } = self.drag {
                if let Some(end) = response
                    .hover_pos()
                    .or(ctx.input(|i| i.pointer.latest_pos()))
                {
                    let end_img = Self::clamp_img(t.to_image(end), natural);
                    let rect = clamp_to_image(
                        egui::Rect::from_two_pos(start_img, end_img),
                        natural,
                    );
                    if rect.width() >= MIN_BOX && rect.height() >= MIN_BOX {
                        self.push_undo();
                        self.detections.push(Detection::drawn(
                            &self.upload_id,
                            self.draw_label,
                            rect,
                        ));
                        self.selected = Some(self.detections.len() - 1);
                    }
                }
            }
            self.drag = DragState::None;
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.tool, Tool::Select, "Select");
            ui.selectable_value(&mut self.tool, Tool::Draw, "Draw");
            ui.separator();
            ui.label("Stage:");
            egui::ComboBox::from_id_salt("draw_label")
                .selected_text(self.draw_label.name())
                .show_ui(ui, |ui| {
                    for stage in LifeStage::ALL {
                        ui.selectable_value(&mut self.draw_label, stage, stage.name());
                    }
                });
            ui.separator();

            if let Some(idx) = self.selected {
                let mut label = self.detections[idx].label;
                egui::ComboBox::from_id_salt("relabel")
                    .selected_text(label.name())
                    .show_ui(ui, |ui| {
                        for stage in LifeStage::ALL {
                            ui.selectable_value(&mut label, stage, stage.name());
                        }
                    });
                if label != self.detections[idx].label {
                    self.push_undo();
                    self.detections[idx].set_label(label);
                }
                if ui.button("Verify").clicked() {
                    self.verify_selected();
                }
                if ui.button("Delete").clicked() {
                    self.delete_selected();
                }
                ui.separator();
            }

            if ui.button("Undo").clicked() {
                self.undo();
            }
            if ui.button("Redo").clicked() {
                self.redo();
            }
            if ui.button("Save").clicked() {
                self.save();
            }
            ui.separator();

            let verified = self.detections.iter().filter(|d| d.is_verified()).count();
            ui.label(format!("{verified}/{} verified", self.detections.len()));
            if !self.status_line.is_empty() {
                ui.separator();
                ui.label(&self.status_line);
            }
        });
    }
}

impl eframe::App for EditorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ensure_texture(ctx);

        // Keyboard shortcuts
        ctx.input(|i| {
            if i.modifiers.ctrl && i.key_pressed(egui::Key::Z) {
                if i.modifiers.shift {
                    self.redo();
                } else {
                    self.undo();
                }
            }
            if i.modifiers.ctrl && i.key_pressed(egui::Key::S) {
                self.save();
            }
            if i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace) {
                self.delete_selected();
            }
        });

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) =
                ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas_rect = response.rect;
            painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

            // The canvas is re-measured every frame, so sidebar toggles and
            // window resizes feed straight into the resolver.
            let container = Size::new(canvas_rect.width(), canvas_rect.height());
            let resolved = self
                .session
                .natural()
                .and_then(|n| viewport::resolve(n, container).map(|frame| (n, frame)));

            let Some((natural, frame)) = resolved else {
                painter.text(
                    canvas_rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "image unavailable",
                    egui::FontId::proportional(16.0),
                    egui::Color32::from_gray(160),
                );
                return;
            };
            let t = ViewTransform::new(canvas_rect.min, frame, natural);

            if let Some(ref tex) = self.texture {
                painter.image(
                    tex.id(),
                    t.image_rect_on_screen(),
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }

            self.draw_detections(&painter, &t);

            // In-progress box preview
            if let DragState::Drawing { start_img } = self.drag {
                if let Some(current) = response.hover_pos() {
                    let end_img = Self::clamp_img(t.to_image(current), natural);
                    let rect = t.rect_to_screen(clamp_to_image(
                        egui::Rect::from_two_pos(start_img, end_img),
                        natural,
                    ));
                    painter.rect_stroke(
                        rect,
                        0.0,
                        egui::Stroke::new(Self::stroke_width(&t), egui::Color32::from_rgb(90, 170, 255)),
                        egui::StrokeKind::Middle,
                    );
                }
            }

            self.handle_pointer(&response, ctx, &t, natural);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(x: f32, y: f32) -> Detection {
        Detection::drawn(
            "photo.jpg",
            LifeStage::Adult,
            egui::Rect::from_min_max(egui::pos2(x, y), egui::pos2(x + 40.0, y + 30.0)),
        )
    }

    fn editor_with(detections: Vec<Detection>) -> EditorApp {
        EditorApp {
            image_path: PathBuf::from("photo.jpg"),
            upload_id: "photo.jpg".to_string(),
            store: SidecarStore::at(PathBuf::from("photo.jpg.detz")),
            session: ImageSession::new(),
            raw_image: None,
            texture: None,
            baseline: detections.clone(),
            detections,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            tool: Tool::Select,
            draw_label: LifeStage::Adult,
            drag: DragState::None,
            selected: None,
            status_line: String::new(),
        }
    }

    #[test]
    fn deleting_the_grabbed_box_cancels_the_drag() {
        // Delete is handled before the pointer block each frame, so the
        // drag must not survive the box it points at.
        let mut app = editor_with(vec![boxed(10.0, 10.0)]);
        app.selected = Some(0);
        app.drag = DragState::Moving { index: 0 };
        app.delete_selected();
        assert!(app.detections.is_empty());
        assert!(matches!(app.drag, DragState::None));
    }

    #[test]
    fn undo_and_redo_cancel_an_in_flight_drag() {
        let mut app = editor_with(vec![boxed(10.0, 10.0)]);
        app.push_undo();
        app.detections.push(boxed(100.0, 100.0));
        app.drag = DragState::Moving { index: 1 };
        app.undo();
        assert!(matches!(app.drag, DragState::None));

        app.drag = DragState::Resizing {
            index: 1,
            handle: Handle::SouthEast,
        };
        app.redo();
        assert!(matches!(app.drag, DragState::None));
    }

    #[test]
    fn stale_drag_index_is_dropped_instead_of_indexing() {
        let natural = Size::new(1000.0, 500.0);
        let mut app = editor_with(vec![boxed(10.0, 10.0)]);

        app.drag = DragState::Moving { index: 7 };
        app.move_box(7, egui::vec2(5.0, 5.0), natural);
        assert!(matches!(app.drag, DragState::None));
        // The surviving box is untouched.
        assert_eq!(app.detections[0].x_min, 10.0);

        app.drag = DragState::Resizing {
            index: 7,
            handle: Handle::SouthEast,
        };
        app.resize_box(7, Handle::SouthEast, egui::pos2(200.0, 200.0));
        assert!(matches!(app.drag, DragState::None));
    }

    #[test]
    fn border_thickness_scales_with_the_contain_fit_zoom() {
        let natural = Size::new(1000.0, 500.0);
        let frame = viewport::resolve(natural, Size::new(800.0, 800.0)).unwrap();
        let t = ViewTransform::new(egui::pos2(0.0, 0.0), frame, natural);
        // 800/1000 scale: the 3 natural-px border renders at 2.4 px.
        assert!((EditorApp::stroke_width(&t) - 2.4).abs() < 1e-4);
    }
}
