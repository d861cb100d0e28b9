//! Displays
//!
//! Geometry of physical displays, the per-display rotation cursor, and the
//! runtime [`Display`] entity that owns one render session and its surface
//! pool for the lifetime of an orchestrator run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::DisplayConfig;
use crate::render::{RenderSession, RenderSurface};

/// Position and size of a physical display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayGeometry {
    /// Left edge in desktop coordinates
    pub left: i32,
    /// Top edge in desktop coordinates
    pub top: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl DisplayGeometry {
    /// A single full-HD screen at the origin
    pub const DEFAULT: Self = Self::new(0, 0, 1920, 1080);

    /// Create a geometry
    #[must_use]
    pub const fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for DisplayGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.left, self.top)
    }
}

/// Sort displays top-to-bottom, then left-to-right
///
/// Keeps the display-index-to-config mapping stable across restarts,
/// whatever order the enumerator reports.
pub fn sort_displays(displays: &mut [DisplayGeometry]) {
    displays.sort_by_key(|d| (d.top, d.left));
}

/// What a display currently has on air
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnAir {
    /// The launch page
    Launch,
    /// Page by index
    Page(usize),
}

/// Cyclic position of a display in its page list and surface pool
///
/// `page_index` names the page the next transition brings on air;
/// `surface_index` names the surface currently on air. Both stay within
/// their list lengths for any number of advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationCursor {
    page_index: usize,
    surface_index: usize,
    page_count: usize,
    surface_count: usize,
    launching: bool,
}

impl RotationCursor {
    /// Cursor on the launch page, first surface
    #[must_use]
    pub fn new(page_count: usize, surface_count: usize) -> Self {
        Self {
            page_index: 0,
            surface_index: 0,
            page_count: page_count.max(1),
            surface_count: surface_count.max(1),
            launching: true,
        }
    }

    /// Page on air
    #[must_use]
    pub fn on_air(&self) -> OnAir {
        if self.launching {
            OnAir::Launch
        } else {
            OnAir::Page((self.page_index + self.page_count - 1) % self.page_count)
        }
    }

    /// Index of the page the next transition brings on air
    #[must_use]
    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Index of the surface on air
    #[must_use]
    pub fn surface_index(&self) -> usize {
        self.surface_index
    }

    /// Index of the surface the next page is prepared on
    #[must_use]
    pub fn next_surface_index(&self) -> usize {
        (self.surface_index + 1) % self.surface_count
    }

    /// Whether the launch page is still on air
    #[must_use]
    pub fn is_launching(&self) -> bool {
        self.launching
    }

    /// Move past one completed transition
    pub fn advance(&mut self) {
        self.launching = false;
        self.page_index = (self.page_index + 1) % self.page_count;
        self.surface_index = self.next_surface_index();
    }
}

/// Point-in-time view of a display, for observers and tests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplaySnapshot {
    /// Physical display index (after sorting)
    pub index: usize,
    /// Display geometry
    pub geometry: DisplayGeometry,
    /// What is on air
    pub on_air: OnAir,
    /// Page the next transition brings on air
    pub page_index: usize,
    /// Surface on air
    pub surface_index: usize,
    /// Whether the display's session has gone away
    pub closed: bool,
}

/// A driven display: one render session, its surface pool, and its cursor
pub struct Display {
    index: usize,
    geometry: DisplayGeometry,
    config: DisplayConfig,
    session: Arc<dyn RenderSession>,
    surfaces: Vec<Arc<dyn RenderSurface>>,
    cursor: Mutex<RotationCursor>,
    closed: AtomicBool,
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("index", &self.index)
            .field("geometry", &self.geometry)
            .field("surfaces", &self.surfaces.len())
            .field("cursor", &*self.cursor.lock())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Display {
    /// Create a display over a launched session and its surface pool
    #[must_use]
    pub fn new(
        index: usize,
        geometry: DisplayGeometry,
        config: DisplayConfig,
        session: Arc<dyn RenderSession>,
        surfaces: Vec<Arc<dyn RenderSurface>>,
    ) -> Self {
        let cursor = RotationCursor::new(config.pages.len(), surfaces.len());
        Self {
            index,
            geometry,
            config,
            session,
            surfaces,
            cursor: Mutex::new(cursor),
            closed: AtomicBool::new(false),
        }
    }

    /// Physical display index
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Display geometry
    #[must_use]
    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    /// Resolved rotation configuration
    #[must_use]
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Owning render session
    #[must_use]
    pub fn session(&self) -> &Arc<dyn RenderSession> {
        &self.session
    }

    /// Surface pool, in rotation order
    #[must_use]
    pub fn surfaces(&self) -> &[Arc<dyn RenderSurface>] {
        &self.surfaces
    }

    /// Current cursor
    #[must_use]
    pub fn cursor(&self) -> RotationCursor {
        *self.cursor.lock()
    }

    /// Advance the cursor past one completed transition
    pub fn advance(&self) {
        self.cursor.lock().advance();
    }

    /// Mark the display closed; returns false if it already was
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Whether the display's session has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Point-in-time view
    #[must_use]
    pub fn snapshot(&self) -> DisplaySnapshot {
        let cursor = self.cursor();
        DisplaySnapshot {
            index: self.index,
            geometry: self.geometry,
            on_air: cursor.on_air(),
            page_index: cursor.page_index(),
            surface_index: cursor.surface_index(),
            closed: self.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_top_to_bottom_then_left_to_right() {
        let mut displays = vec![
            DisplayGeometry::new(1920, 1080, 1920, 1080),
            DisplayGeometry::new(1920, 0, 1920, 1080),
            DisplayGeometry::new(0, 1080, 1920, 1080),
            DisplayGeometry::new(0, 0, 1920, 1080),
        ];
        sort_displays(&mut displays);

        let origins: Vec<_> = displays.iter().map(|d| (d.left, d.top)).collect();
        assert_eq!(origins, vec![(0, 0), (1920, 0), (0, 1080), (1920, 1080)]);
    }

    #[test]
    fn test_cursor_starts_on_launch_page() {
        let cursor = RotationCursor::new(3, 2);
        assert_eq!(cursor.on_air(), OnAir::Launch);
        assert_eq!(cursor.page_index(), 0);
        assert_eq!(cursor.surface_index(), 0);
        assert_eq!(cursor.next_surface_index(), 1);
    }

    #[test]
    fn test_cursor_walks_pages_after_launch() {
        let mut cursor = RotationCursor::new(3, 2);

        cursor.advance();
        assert_eq!(cursor.on_air(), OnAir::Page(0));
        assert_eq!(cursor.page_index(), 1);
        assert_eq!(cursor.surface_index(), 1);

        cursor.advance();
        assert_eq!(cursor.on_air(), OnAir::Page(1));
        assert_eq!(cursor.surface_index(), 0);

        cursor.advance();
        assert_eq!(cursor.on_air(), OnAir::Page(2));
        assert_eq!(cursor.page_index(), 0);

        cursor.advance();
        assert_eq!(cursor.on_air(), OnAir::Page(0));
    }

    #[test]
    fn test_cursor_indices_stay_in_bounds() {
        for pages in 1..=5 {
            for surfaces in 1..=4 {
                let mut cursor = RotationCursor::new(pages, surfaces);
                for _ in 0..50 {
                    cursor.advance();
                    assert!(cursor.page_index() < pages);
                    assert!(cursor.surface_index() < surfaces);
                    assert!(cursor.next_surface_index() < surfaces);
                    match cursor.on_air() {
                        OnAir::Page(i) => assert!(i < pages),
                        OnAir::Launch => panic!("Launch page is shown only once"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_page_single_surface() {
        let mut cursor = RotationCursor::new(1, 1);
        cursor.advance();
        assert_eq!(cursor.on_air(), OnAir::Page(0));
        assert_eq!(cursor.page_index(), 0);
        assert_eq!(cursor.next_surface_index(), cursor.surface_index());
    }

    #[test]
    fn test_geometry_display() {
        assert_eq!(DisplayGeometry::new(1920, 0, 1280, 720).to_string(), "1280x720+1920+0");
        assert_eq!(DisplayGeometry::default(), DisplayGeometry::DEFAULT);
    }
}
