//! Compositor: owns the physical framebuffer, arbitrates window
//! creation/presentation, and applies rotation/flip transforms.
//!
//! Grounded in `spec.md` §4.6; the pixel-pushing and panel-refresh
//! collaborators (`SDL_badgevmsframebuffer.c`/`SDL_badgevmsvideo.c`) stay
//! out of scope per §1 — this module owns window/framebuffer bookkeeping
//! and the foreground/present policy, not panel I/O.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use bitflags::bitflags;
use thiserror::Error;

use crate::{error::ErrorKind, event::EventQueue};

/// Failure modes for compositor operations.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum CompositorError {
    /// No window with that id is registered.
    #[error("no such window")]
    NoSuchWindow,
    /// No framebuffer with that index is attached to the window.
    #[error("no such framebuffer")]
    NoSuchFramebuffer,
}

impl CompositorError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

bitflags! {
    /// Flags passed to [`Compositor::window_create`].
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct WindowFlags: u32 {
        /// The application manages its own double buffering.
        const DOUBLE_BUFFERED = 0b0001;
        /// The window wants to be the sole fullscreen surface.
        const FULLSCREEN = 0b0010;
        /// The window yields foreground priority to others.
        const LOW_PRIORITY = 0b0100;
        /// Mirror the framebuffer horizontally on present.
        const FLIP_HORIZONTAL = 0b1000;
    }
}

/// Physical display rotation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// Rotated 90 degrees clockwise.
    Deg90,
    /// Rotated 180 degrees.
    Deg180,
    /// Rotated 270 degrees clockwise.
    Deg270,
}

/// Pixel storage format.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PixelFormat {
    /// 16-bit RGB, red in the high bits.
    Rgb565,
    /// 16-bit BGR, blue in the high bits.
    Bgr565,
}

/// A pixel buffer attached to a window. Backed by a `Vec<u16>` standing in
/// for a PSRAM allocation.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u16>,
}

impl Framebuffer {
    fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            pixels: vec![0; (width * height) as usize],
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel storage format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Size of the backing pixel buffer in bytes (`width * height * 2`).
    pub fn size_bytes(&self) -> usize {
        self.pixels.len() * 2
    }

    /// Reads the 16-bit pixel at `(x, y)`.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<u16> {
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Writes the 16-bit pixel at `(x, y)`. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u16) {
        if let Some(slot) = self.pixels.get_mut((y * self.width + x) as usize) {
            *slot = value;
        }
    }

    fn flipped_horizontal(&self) -> Vec<u16> {
        let mut out = vec![0u16; self.pixels.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let src = (y * self.width + x) as usize;
                let dst = (y * self.width + (self.width - 1 - x)) as usize;
                out[dst] = self.pixels[src];
            }
        }
        out
    }
}

/// Opaque window id returned by [`Compositor::window_create`].
pub type WindowId = u64;

/// Write access to a window's framebuffer, borrowed out of the
/// compositor's window table. Dereferences to [`Framebuffer`]; dropping it
/// releases the table lock.
pub struct MappedFramebuffer<'a> {
    windows: std::sync::MutexGuard<'a, HashMap<WindowId, WindowState>>,
    window: WindowId,
    index: usize,
}

impl std::fmt::Debug for MappedFramebuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFramebuffer").finish_non_exhaustive()
    }
}

impl std::ops::Deref for MappedFramebuffer<'_> {
    type Target = Framebuffer;

    fn deref(&self) -> &Framebuffer {
        &self.windows[&self.window].framebuffers[self.index]
    }
}

impl std::ops::DerefMut for MappedFramebuffer<'_> {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self
            .windows
            .get_mut(&self.window)
            .expect("window removed while mapped")
            .framebuffers[self.index]
    }
}

struct WindowState {
    title: String,
    size: (u32, u32),
    flags: WindowFlags,
    framebuffers: Vec<Framebuffer>,
    events: EventQueue,
}

/// Owns the physical display surface and every application window.
pub struct Compositor {
    rotation: Mutex<Rotation>,
    windows: Mutex<HashMap<WindowId, WindowState>>,
    foreground: Mutex<Option<WindowId>>,
    next_id: AtomicU64,
    last_presented: Mutex<Option<Vec<u16>>>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor").finish_non_exhaustive()
    }
}

impl Compositor {
    /// Creates a compositor with no windows and no rotation.
    pub fn new() -> Self {
        Self {
            rotation: Mutex::new(Rotation::default()),
            windows: Mutex::new(HashMap::new()),
            foreground: Mutex::new(None),
            next_id: AtomicU64::new(1),
            last_presented: Mutex::new(None),
        }
    }

    /// Sets the physical display rotation.
    pub fn set_rotation(&self, rotation: Rotation) {
        *self.rotation.lock().expect("rotation mutex poisoned") = rotation;
    }

    /// Allocates a new window. A fullscreen window becomes the foreground
    /// window, matching the "most recently created fullscreen window"
    /// policy from `spec.md` §4.6.
    pub fn window_create(&self, title: &str, size: (u32, u32), flags: WindowFlags) -> WindowId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().expect("window table poisoned").insert(
            id,
            WindowState {
                title: title.to_string(),
                size,
                flags,
                framebuffers: Vec::new(),
                events: EventQueue::new(64),
            },
        );
        if flags.contains(WindowFlags::FULLSCREEN) {
            *self.foreground.lock().expect("foreground mutex poisoned") = Some(id);
        }
        log::info!("created window {id} ({title:?}, {size:?})");
        id
    }

    /// Allocates a framebuffer attached to `window`, returning its index.
    pub fn window_framebuffer_create(
        &self,
        window: WindowId,
        size: (u32, u32),
        format: PixelFormat,
    ) -> Result<usize, CompositorError> {
        let mut windows = self.windows.lock().expect("window table poisoned");
        let state = windows.get_mut(&window).ok_or(CompositorError::NoSuchWindow)?;
        state.framebuffers.push(Framebuffer::new(size.0, size.1, format));
        Ok(state.framebuffers.len() - 1)
    }

    /// Hands back write access to a window's framebuffer so the caller can
    /// paint into it; the returned guard holds the window table locked for
    /// its lifetime, the same tradeoff `window_title_set` and friends make.
    pub fn window_framebuffer(
        &self,
        window: WindowId,
        index: usize,
    ) -> Result<MappedFramebuffer<'_>, CompositorError> {
        let windows = self.windows.lock().expect("window table poisoned");
        let state = windows.get(&window).ok_or(CompositorError::NoSuchWindow)?;
        if state.framebuffers.get(index).is_none() {
            return Err(CompositorError::NoSuchFramebuffer);
        }
        Ok(MappedFramebuffer { windows, window, index })
    }

    /// True if `window` is the window currently driving the display.
    pub fn is_foreground(&self, window: WindowId) -> bool {
        *self.foreground.lock().expect("foreground mutex poisoned") == Some(window)
    }

    /// Composes `window`'s framebuffer onto the physical output if it is
    /// foreground; otherwise returns promptly with no observable effect.
    pub fn window_present(&self, window: WindowId, framebuffer_index: usize) -> Result<(), CompositorError> {
        if !self.is_foreground(window) {
            return Ok(());
        }
        let windows = self.windows.lock().expect("window table poisoned");
        let state = windows.get(&window).ok_or(CompositorError::NoSuchWindow)?;
        let fb = state
            .framebuffers
            .get(framebuffer_index)
            .ok_or(CompositorError::NoSuchFramebuffer)?;

        let presented = if state.flags.contains(WindowFlags::FLIP_HORIZONTAL) {
            fb.flipped_horizontal()
        } else {
            fb.pixels.clone()
        };
        *self.last_presented.lock().expect("present mutex poisoned") = Some(presented);
        Ok(())
    }

    /// The pixels most recently composed to the physical output, if any.
    /// Exposed for tests and host tooling; real panel output is an
    /// external collaborator.
    pub fn last_presented(&self) -> Option<Vec<u16>> {
        self.last_presented.lock().expect("present mutex poisoned").clone()
    }

    /// Returns the window's current flags.
    pub fn window_flags_get(&self, window: WindowId) -> Result<WindowFlags, CompositorError> {
        let windows = self.windows.lock().expect("window table poisoned");
        Ok(windows.get(&window).ok_or(CompositorError::NoSuchWindow)?.flags)
    }

    /// Replaces the window's flags.
    pub fn window_flags_set(&self, window: WindowId, flags: WindowFlags) -> Result<(), CompositorError> {
        let mut windows = self.windows.lock().expect("window table poisoned");
        windows.get_mut(&window).ok_or(CompositorError::NoSuchWindow)?.flags = flags;
        Ok(())
    }

    /// Renames the window.
    pub fn window_title_set(&self, window: WindowId, title: &str) -> Result<(), CompositorError> {
        let mut windows = self.windows.lock().expect("window table poisoned");
        windows.get_mut(&window).ok_or(CompositorError::NoSuchWindow)?.title = title.to_string();
        Ok(())
    }

    /// Posts an event to `window`'s queue; overflow drops the oldest.
    pub fn post_event(&self, window: WindowId, event: crate::event::Event) -> Result<(), CompositorError> {
        let windows = self.windows.lock().expect("window table poisoned");
        windows
            .get(&window)
            .ok_or(CompositorError::NoSuchWindow)?
            .events
            .push(event);
        Ok(())
    }

    /// Polls `window`'s next event. When `blocking` is false and nothing is
    /// queued, returns [`crate::event::Event::None`] immediately; when
    /// `blocking` is true, waits up to `timeout_ms` (or indefinitely if
    /// `None`) for one to arrive.
    pub fn window_event_poll(
        &self,
        window: WindowId,
        blocking: bool,
        timeout_ms: Option<u64>,
    ) -> Result<crate::event::Event, CompositorError> {
        if !blocking {
            let windows = self.windows.lock().expect("window table poisoned");
            return Ok(windows.get(&window).ok_or(CompositorError::NoSuchWindow)?.events.pop());
        }

        let timeout = timeout_ms.map(std::time::Duration::from_millis);
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            {
                let windows = self.windows.lock().expect("window table poisoned");
                let state = windows.get(&window).ok_or(CompositorError::NoSuchWindow)?;
                let event = state.events.pop();
                if event != crate::event::Event::None {
                    return Ok(event);
                }
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Ok(crate::event::Event::None);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    /// Destroys a window, freeing its framebuffers and event queue. If it
    /// was foreground, no window becomes foreground automatically.
    pub fn window_destroy(&self, window: WindowId) -> Result<(), CompositorError> {
        let mut windows = self.windows.lock().expect("window table poisoned");
        windows.remove(&window).ok_or(CompositorError::NoSuchWindow)?;
        let mut foreground = self.foreground.lock().expect("foreground mutex poisoned");
        if *foreground == Some(window) {
            *foreground = None;
        }
        Ok(())
    }

    /// The window's requested logical size.
    pub fn window_size(&self, window: WindowId) -> Result<(u32, u32), CompositorError> {
        let windows = self.windows.lock().expect("window table poisoned");
        Ok(windows.get(&window).ok_or(CompositorError::NoSuchWindow)?.size)
    }

    #[cfg(test)]
    fn window_title(&self, window: WindowId) -> String {
        self.windows.lock().unwrap().get(&window).unwrap().title.clone()
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn framebuffer_size_matches_width_height_times_two() {
        let fb = Framebuffer::new(320, 240, PixelFormat::Rgb565);
        assert_eq!(fb.size_bytes(), 320 * 240 * 2);
    }

    #[test]
    fn set_pixel_does_not_corrupt_neighbours() {
        let mut fb = Framebuffer::new(4, 4, PixelFormat::Rgb565);
        fb.set_pixel(1, 1, 0xBEEF);
        assert_eq!(fb.get_pixel(1, 1), Some(0xBEEF));
        assert_eq!(fb.get_pixel(0, 1), Some(0));
        assert_eq!(fb.get_pixel(2, 1), Some(0));
        assert_eq!(fb.get_pixel(1, 0), Some(0));
        assert_eq!(fb.get_pixel(1, 2), Some(0));
    }

    #[test]
    fn presenting_non_foreground_window_has_no_effect() {
        let comp = Compositor::new();
        let w = comp.window_create("bg", (4, 4), WindowFlags::empty());
        comp.window_framebuffer_create(w, (4, 4), PixelFormat::Rgb565).unwrap();
        comp.window_present(w, 0).unwrap();
        assert!(comp.last_presented().is_none());
    }

    #[test]
    fn foreground_window_presents() {
        let comp = Compositor::new();
        let w = comp.window_create("fg", (2, 1), WindowFlags::FULLSCREEN);
        comp.window_framebuffer_create(w, (2, 1), PixelFormat::Rgb565).unwrap();
        comp.window_present(w, 0).unwrap();
        assert_eq!(comp.last_presented(), Some(vec![0, 0]));
    }

    #[test]
    fn flip_horizontal_mirrors_row() {
        let comp = Compositor::new();
        let w = comp.window_create("fg", (2, 1), WindowFlags::FULLSCREEN | WindowFlags::FLIP_HORIZONTAL);
        let idx = comp.window_framebuffer_create(w, (2, 1), PixelFormat::Rgb565).unwrap();
        {
            let mut fb = comp.window_framebuffer(w, idx).unwrap();
            fb.set_pixel(0, 0, 0xAAAA);
            fb.set_pixel(1, 0, 0xBBBB);
        }
        comp.window_present(w, idx).unwrap();
        assert_eq!(comp.last_presented(), Some(vec![0xBBBB, 0xAAAA]));
    }

    #[test]
    fn window_framebuffer_rejects_unknown_index() {
        let comp = Compositor::new();
        let w = comp.window_create("fg", (2, 1), WindowFlags::empty());
        comp.window_framebuffer_create(w, (2, 1), PixelFormat::Rgb565).unwrap();
        assert_eq!(
            comp.window_framebuffer(w, 7).unwrap_err(),
            CompositorError::NoSuchFramebuffer
        );
    }

    #[test]
    fn window_title_set_updates() {
        let comp = Compositor::new();
        let w = comp.window_create("before", (1, 1), WindowFlags::empty());
        comp.window_title_set(w, "after").unwrap();
        assert_eq!(comp.window_title(w), "after");
    }
}
