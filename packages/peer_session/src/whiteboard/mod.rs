//! Whiteboard replication.
//!
//! Local pointer movement becomes one [`StrokeEvent`] per sample, applied to
//! the local [`Raster`] and handed back for sending. Remote events go through
//! the same [`Raster::apply`], so two rasters that applied the same ordered
//! events hold identical pixels. There is no history: a peer that connects
//! late only sees events from that moment on.

mod raster;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WhiteboardError;
use crate::protocol::StrokeEvent;

pub use raster::Raster;

/// Eraser strokes remove a band twice as wide as the selected size.
pub const ERASER_WIDTH_FACTOR: f32 = 2.0;
pub const MIN_LINE_WIDTH: f32 = 1.0;
pub const MAX_LINE_WIDTH: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Opaque RGB color, `#rrggbb` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = WhiteboardError;

    /// Accepts `#rrggbb` and `#rgb` (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WhiteboardError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Color::rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => Ok(Color::rgb(
                channel(&hex[0..1])? * 17,
                channel(&hex[1..2])? * 17,
                channel(&hex[2..3])? * 17,
            )),
            _ => Err(invalid()),
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Color {
    type Error = WhiteboardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pen,
    Eraser,
}

/// Local drawing state plus the raster it paints on.
pub struct Whiteboard {
    raster: Raster,
    tool: Tool,
    color: Color,
    line_width: f32,
    /// Previous sample of the stroke in progress, `None` when the pointer is up.
    last: Option<Point>,
}

impl Whiteboard {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raster: Raster::new(width, height),
            tool: Tool::Pen,
            color: Color::BLACK,
            line_width: 2.0,
            last: None,
        }
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn line_width(&self) -> f32 {
        self.line_width
    }

    /// Set the tool size, clamped to the supported range.
    pub fn set_line_width(&mut self, width: f32) {
        if width.is_finite() {
            self.line_width = width.clamp(MIN_LINE_WIDTH, MAX_LINE_WIDTH);
        }
    }

    pub fn is_drawing(&self) -> bool {
        self.last.is_some()
    }

    pub fn pointer_down(&mut self, at: Point) {
        if at.is_finite() {
            self.last = Some(at);
        }
    }

    /// Extend the stroke in progress to `at`. Returns the event to replicate.
    pub fn pointer_move(&mut self, at: Point) -> Option<StrokeEvent> {
        let from = self.last?;
        if !at.is_finite() {
            return None;
        }

        let event = match self.tool {
            Tool::Pen => StrokeEvent::Draw {
                from,
                to: at,
                color: self.color,
                line_width: self.line_width,
            },
            Tool::Eraser => StrokeEvent::Erase {
                from,
                to: at,
                line_width: self.line_width,
            },
        };
        self.last = Some(at);

        // Out-of-range input is neither drawn nor sent.
        if let Err(e) = self.raster.apply(&event) {
            tracing::warn!(error = %e, "local stroke rejected");
            return None;
        }
        Some(event)
    }

    /// Pointer released or left the surface.
    pub fn pointer_up(&mut self) {
        self.last = None;
    }

    pub fn clear(&mut self) -> StrokeEvent {
        self.raster.clear();
        StrokeEvent::Clear
    }

    /// Apply an event received from the remote peer.
    pub fn apply_remote(&mut self, event: &StrokeEvent) -> Result<(), WhiteboardError> {
        self.raster.apply(event)
    }

    pub fn export_png(&self) -> Result<Vec<u8>, WhiteboardError> {
        self.raster.encode_png()
    }
}
