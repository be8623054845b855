use egui::{CursorIcon, Pos2, Rect, Vec2};

// ── Viewport Geometry ───────────────────────────────────────────────────────

/// A measured width/height pair (natural image size or canvas size).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_valid(self) -> bool {
        self.width.is_finite() && self.width > 0.0 && self.height.is_finite() && self.height > 0.0
    }
}

/// Where the image lands inside the canvas, in canvas-relative pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportRect {
    pub width: f32,
    pub height: f32,
    pub top: f32,
    pub left: f32,
}

/// Fit an image into a container the way `object-fit: contain` does:
/// the whole image stays visible, aspect ratio preserved, letterbox or
/// pillarbox margins split evenly.
///
/// Returns `None` for any non-positive or non-finite dimension; callers
/// treat that as "not ready to render annotations".
pub fn resolve(natural: Size, container: Size) -> Option<ViewportRect> {
    if !natural.is_valid() || !container.is_valid() {
        return None;
    }
    let image_ratio = natural.width / natural.height;
    let container_ratio = container.width / container.height;
    if image_ratio > container_ratio {
        // Image relatively wider: width-constrained, letterboxed.
        let width = container.width;
        let height = container.width / image_ratio;
        Some(ViewportRect {
            width,
            height,
            top: (container.height - height) / 2.0,
            left: 0.0,
        })
    } else {
        // Height-constrained, pillarboxed. Equal ratios land here so the
        // tie-break is deterministic.
        let height = container.height;
        let width = container.height * image_ratio;
        Some(ViewportRect {
            width,
            height,
            top: 0.0,
            left: (container.width - width) / 2.0,
        })
    }
}

/// Maps between image-space and screen-space for one resolved frame.
///
/// `origin` is the canvas rect's top-left in screen coordinates; the
/// frame's top/left are relative to it.
#[derive(Clone, Copy, Debug)]
pub struct ViewTransform {
    pub origin: Pos2,
    pub frame: ViewportRect,
    pub natural: Size,
}

impl ViewTransform {
    pub fn new(origin: Pos2, frame: ViewportRect, natural: Size) -> Self {
        Self {
            origin,
            frame,
            natural,
        }
    }

    /// On-screen pixels per natural pixel.
    pub fn scale(&self) -> f32 {
        self.frame.width / self.natural.width
    }

    /// Convert image-space coords to screen-space.
    pub fn to_screen(&self, img_pos: Pos2) -> Pos2 {
        let s = self.scale();
        egui::pos2(
            self.origin.x + self.frame.left + img_pos.x * s,
            self.origin.y + self.frame.top + img_pos.y * s,
        )
    }

    /// Convert screen-space coords to image-space.
    pub fn to_image(&self, screen_pos: Pos2) -> Pos2 {
        let s = self.scale();
        egui::pos2(
            (screen_pos.x - self.origin.x - self.frame.left) / s,
            (screen_pos.y - self.origin.y - self.frame.top) / s,
        )
    }

    pub fn rect_to_screen(&self, img_rect: Rect) -> Rect {
        Rect::from_min_max(self.to_screen(img_rect.min), self.to_screen(img_rect.max))
    }

    /// The whole image's on-screen rect.
    pub fn image_rect_on_screen(&self) -> Rect {
        Rect::from_min_size(
            self.origin + egui::vec2(self.frame.left, self.frame.top),
            egui::vec2(self.frame.width, self.frame.height),
        )
    }
}

// ── Resize Handles ──────────────────────────────────────────────────────────

/// The eight grab points of a selected box: corners plus edge midpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    NorthWest,
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
}

impl Handle {
    pub const ALL: [Handle; 8] = [
        Handle::NorthWest,
        Handle::North,
        Handle::NorthEast,
        Handle::East,
        Handle::SouthEast,
        Handle::South,
        Handle::SouthWest,
        Handle::West,
    ];

    /// Outward direction of this handle: -1/0/+1 per axis.
    fn outward(self) -> Vec2 {
        match self {
            Handle::NorthWest => egui::vec2(-1.0, -1.0),
            Handle::North => egui::vec2(0.0, -1.0),
            Handle::NorthEast => egui::vec2(1.0, -1.0),
            Handle::East => egui::vec2(1.0, 0.0),
            Handle::SouthEast => egui::vec2(1.0, 1.0),
            Handle::South => egui::vec2(0.0, 1.0),
            Handle::SouthWest => egui::vec2(-1.0, 1.0),
            Handle::West => egui::vec2(-1.0, 0.0),
        }
    }

    /// The grab point's center for a box drawn at `screen_rect` with a
    /// border of `stroke_width` on-screen pixels: the corner or edge
    /// midpoint, pushed outward by half the border so the handle sits
    /// centered on the border line at any zoom.
    pub fn center(self, screen_rect: Rect, stroke_width: f32) -> Pos2 {
        let dir = self.outward();
        let base = egui::pos2(
            match dir.x {
                x if x < 0.0 => screen_rect.min.x,
                x if x > 0.0 => screen_rect.max.x,
                _ => screen_rect.center().x,
            },
            match dir.y {
                y if y < 0.0 => screen_rect.min.y,
                y if y > 0.0 => screen_rect.max.y,
                _ => screen_rect.center().y,
            },
        );
        base + dir * (stroke_width / 2.0)
    }

    pub fn cursor(self) -> CursorIcon {
        match self {
            Handle::NorthWest | Handle::SouthEast => CursorIcon::ResizeNwSe,
            Handle::NorthEast | Handle::SouthWest => CursorIcon::ResizeNeSw,
            Handle::North | Handle::South => CursorIcon::ResizeVertical,
            Handle::East | Handle::West => CursorIcon::ResizeHorizontal,
        }
    }

    /// Apply a drag of this handle to an image-space rect, with the
    /// pointer at `img_pos`. Untouched edges stay fixed; each dragged
    /// edge stops `min_size` short of its opposite edge.
    pub fn resize(self, rect: Rect, img_pos: Pos2, min_size: f32) -> Rect {
        let dir = self.outward();
        let mut r = rect;
        if dir.x < 0.0 {
            r.min.x = img_pos.x.min(r.max.x - min_size);
        } else if dir.x > 0.0 {
            r.max.x = img_pos.x.max(r.min.x + min_size);
        }
        if dir.y < 0.0 {
            r.min.y = img_pos.y.min(r.max.y - min_size);
        } else if dir.y > 0.0 {
            r.max.y = img_pos.y.max(r.min.y + min_size);
        }
        r
    }
}

/// Which handle, if any, is under the pointer.
pub fn hit_handle(screen_rect: Rect, stroke_width: f32, pointer: Pos2, radius: f32) -> Option<Handle> {
    Handle::ALL
        .into_iter()
        .find(|h| h.center(screen_rect, stroke_width).distance(pointer) <= radius)
}
