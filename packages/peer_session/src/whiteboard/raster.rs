use crate::error::WhiteboardError;
use crate::protocol::StrokeEvent;

use super::{Color, ERASER_WIDTH_FACTOR, Point};

const CHANNELS: usize = 4;

/// Largest accepted coordinate or line width magnitude. Segment math squares
/// lengths, and anything near `f32::MAX` overflows to NaN coverage.
const MAX_MAGNITUDE: f32 = 1.0e6;

/// How a stroke combines with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Blend {
    /// Paint an opaque color over the destination.
    SourceOver(Color),
    /// Remove destination alpha where the stroke covers it.
    DestinationOut,
}

/// Fixed-size RGBA8 surface with straight (non-premultiplied) alpha.
///
/// The surface is a pure fold over the events applied to it: the same ordered
/// events on two fresh rasters of the same size give identical bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("blank", &self.is_blank())
            .finish()
    }
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// RGBA of one pixel, `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Apply one replicated event. Invalid geometry leaves the surface untouched.
    pub fn apply(&mut self, event: &StrokeEvent) -> Result<(), WhiteboardError> {
        match event {
            StrokeEvent::Draw {
                from,
                to,
                color,
                line_width,
            } => {
                validate(from, to, *line_width)?;
                self.stroke(*from, *to, *line_width, Blend::SourceOver(*color));
            }
            StrokeEvent::Erase {
                from,
                to,
                line_width,
            } => {
                validate(from, to, *line_width)?;
                self.stroke(
                    *from,
                    *to,
                    *line_width * ERASER_WIDTH_FACTOR,
                    Blend::DestinationOut,
                );
            }
            StrokeEvent::Clear => self.clear(),
        }
        Ok(())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, WhiteboardError> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Stroke a round-capped, anti-aliased segment.
    fn stroke(&mut self, from: Point, to: Point, width: f32, blend: Blend) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let radius = width / 2.0;
        let reach = radius + 1.0;

        let min_x = clamp_index(from.x.min(to.x) - reach, self.width);
        let max_x = clamp_index(from.x.max(to.x) + reach, self.width);
        let min_y = clamp_index(from.y.min(to.y) - reach, self.height);
        let max_y = clamp_index(from.y.max(to.y) + reach, self.height);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let coverage = (radius + 0.5 - distance_to_segment(center, from, to)).clamp(0.0, 1.0);
                if coverage.is_nan() || coverage <= 0.0 {
                    continue;
                }
                let i = self.offset(x, y);
                let px = &mut self.pixels[i..i + CHANNELS];
                match blend {
                    Blend::SourceOver(color) => source_over(px, color, coverage),
                    Blend::DestinationOut => destination_out(px, coverage),
                }
            }
        }
    }
}

fn validate(from: &Point, to: &Point, line_width: f32) -> Result<(), WhiteboardError> {
    if !from.is_finite() || !to.is_finite() {
        return Err(WhiteboardError::InvalidStroke("non-finite coordinate"));
    }
    if [from.x, from.y, to.x, to.y]
        .iter()
        .any(|v| v.abs() > MAX_MAGNITUDE)
    {
        return Err(WhiteboardError::InvalidStroke("coordinate out of range"));
    }
    if !line_width.is_finite() || line_width <= 0.0 {
        return Err(WhiteboardError::InvalidStroke("line width must be positive"));
    }
    if line_width > MAX_MAGNITUDE {
        return Err(WhiteboardError::InvalidStroke("line width out of range"));
    }
    Ok(())
}

fn clamp_index(v: f32, len: u32) -> u32 {
    (v.floor().max(0.0) as u32).min(len - 1)
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

fn source_over(px: &mut [u8], color: Color, coverage: f32) {
    let sa = coverage;
    let da = px[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        px.fill(0);
        return;
    }
    let mix = |src: u8, dst: u8| {
        let v = (src as f32 * sa + dst as f32 * da * (1.0 - sa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    px[0] = mix(color.r, px[0]);
    px[1] = mix(color.g, px[1]);
    px[2] = mix(color.b, px[2]);
    px[3] = (out_a * 255.0).round() as u8;
}

fn destination_out(px: &mut [u8], coverage: f32) {
    let a = (px[3] as f32 * (1.0 - coverage)).round() as u8;
    if a == 0 {
        px.fill(0);
    } else {
        px[3] = a;
    }
}
