//! The rendering collaborator interface.
//!
//! Windowing, texturing, and font rasterization are external concerns; the
//! core drives them through the [`Renderer`] trait. The library ships a
//! [`HeadlessRenderer`] that implements the full surface without a display,
//! used by tests, scripts, and hosts that render elsewhere.

use std::sync::Arc;

use crate::{document::Document, entity::Entity, resource};

/// Frame-level hooks the engine calls on its rendering collaborator.
pub trait Renderer: Send {
    fn set_fps(&mut self, fps: u32);
    fn set_resolution(&mut self, width: u32, height: u32, scale: f64);
    fn show_fps(&mut self, show: bool);
    fn move_cam(&mut self, dx: f64, dy: f64);
    /// Positions the camera; `center` places the point at the viewport center.
    fn set_cam(&mut self, x: f64, y: f64, center: bool);
    /// Current camera position.
    fn cam(&self) -> (f64, f64);
    /// Writes a capture of the current scene to `path`. Returns success.
    fn snapshot(&mut self, entities: &[Arc<Entity>], path: &str) -> bool;
    /// Re-rasterizes an entity's text after `recalculate_text` was flagged.
    fn rasterize_text(&mut self, entity: &Entity);
    /// Draws one frame of the scene.
    fn render_frame(&mut self, entities: &[Arc<Entity>], global: &Document);
}

/// Display-less renderer: tracks state, counts frames, and snapshots scenes
/// as serialized JSON.
#[derive(Debug)]
pub struct HeadlessRenderer {
    fps: u32,
    resolution: (u32, u32),
    scale: f64,
    show_fps: bool,
    cam: (f64, f64),
    frames_rendered: u64,
    text_rasterizations: u64,
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self {
            fps: 60,
            resolution: (1000, 1000),
            scale: 1.0,
            show_fps: false,
            cam: (0.0, 0.0),
            frames_rendered: 0,
            text_rasterizations: 0,
        }
    }
}

impl HeadlessRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    #[must_use]
    pub fn text_rasterizations(&self) -> u64 {
        self.text_rasterizations
    }
}

impl Renderer for HeadlessRenderer {
    fn set_fps(&mut self, fps: u32) {
        self.fps = fps;
    }

    fn set_resolution(&mut self, width: u32, height: u32, scale: f64) {
        self.resolution = (width, height);
        self.scale = scale;
    }

    fn show_fps(&mut self, show: bool) {
        self.show_fps = show;
    }

    fn move_cam(&mut self, dx: f64, dy: f64) {
        self.cam.0 += dx;
        self.cam.1 += dy;
    }

    fn set_cam(&mut self, x: f64, y: f64, center: bool) {
        if center {
            self.cam = (
                x - f64::from(self.resolution.0) / 2.0,
                y - f64::from(self.resolution.1) / 2.0,
            );
        } else {
            self.cam = (x, y);
        }
    }

    fn cam(&self) -> (f64, f64) {
        self.cam
    }

    fn snapshot(&mut self, entities: &[Arc<Entity>], path: &str) -> bool {
        let scene: Vec<String> = entities.iter().map(|entity| entity.serialize()).collect();
        let contents = format!("[{}]", scene.join(","));
        match resource::write_text(path, &contents) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("snapshot to {path:?} failed: {err}");
                false
            }
        }
    }

    fn rasterize_text(&mut self, _entity: &Entity) {
        self.text_rasterizations += 1;
    }

    fn render_frame(&mut self, _entities: &[Arc<Entity>], _global: &Document) {
        self.frames_rendered += 1;
    }
}
