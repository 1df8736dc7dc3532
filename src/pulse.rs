//! # Pulsing Marker Icons
//!
//! One [`PulseIcon`] exists per risk category. The map engine calls
//! [`AnimatedImage::render`] on every repaint and uploads the resulting
//! pixels as the category's marker image.
//!
//! ## Frame Layout
//! For a square icon of side `size` and a cycle position
//! `t = (elapsed mod period) / period`:
//! - **Inner dot**: radius `0.3 * size/2`, fully opaque, 2 px white outline
//! - **Outer ring**: radius grows linearly from the inner radius to `size/2`
//!   while its opacity fades from 0.35 to 0, then snaps back at wraparound
//!
//! Frames are a pure function of `elapsed mod period`, so the animation is
//! periodic and any frame can be reproduced exactly.

use crate::canvas::Canvas;
use crate::engine::AnimatedImage;
use crate::risk::{PulseStyle, Rgb};
use embedded_graphics::{
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, PrimitiveStyle, PrimitiveStyleBuilder, StrokeAlignment},
};
use thiserror::Error;

/// Default side length of a marker icon in pixels.
pub const DEFAULT_ICON_SIZE: u32 = 100;
/// Largest side length an icon can acquire a surface for.
pub const MAX_ICON_SIZE: u32 = 1024;

const INNER_RADIUS_RATIO: f64 = 0.3;
const RING_GROWTH_RATIO: f64 = 0.7;
const RING_MAX_ALPHA: f64 = 0.35;
const OUTLINE_WIDTH: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IconError {
    /// The icon could not acquire a drawing surface
    #[error("render surface unavailable: {0}")]
    SurfaceUnavailable(String),
}

/// Per-frame shape parameters, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseGeometry {
    /// Cycle position in `[0, 1)`
    pub t: f64,
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub outer_alpha: f64,
}

/// Procedurally animated marker for one risk category.
pub struct PulseIcon {
    style: PulseStyle,
    size: u32,
    surface: Option<Canvas>,
    /// Last completed frame, handed to the engine
    data: Vec<u8>,
}

impl PulseIcon {
    pub fn new(style: PulseStyle, size: u32) -> Self {
        Self {
            style,
            size,
            surface: None,
            data: frame_len(size).map(|len| vec![0; len]).unwrap_or_default(),
        }
    }

    pub fn style(&self) -> PulseStyle {
        self.style
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Shape of the frame shown `elapsed_ms` into the animation.
    pub fn geometry(&self, elapsed_ms: u64) -> PulseGeometry {
        let period = self.style.period_ms.max(1);
        let t = (elapsed_ms % period) as f64 / period as f64;
        let half = self.size as f64 / 2.0;
        let inner_radius = half * INNER_RADIUS_RATIO;

        PulseGeometry {
            t,
            inner_radius,
            outer_radius: inner_radius + half * RING_GROWTH_RATIO * t,
            outer_alpha: RING_MAX_ALPHA * (1.0 - t),
        }
    }

    fn draw_frame(canvas: &mut Canvas, color: Rgb, geometry: &PulseGeometry) {
        let center = Point::new(canvas.width() as i32 / 2, canvas.height() as i32 / 2);
        let fill = Rgb888::new(color.r, color.g, color.b);
        let white = Rgb888::new(Rgb::WHITE.r, Rgb::WHITE.g, Rgb::WHITE.b);

        canvas.clear_transparent();

        // Outer expanding ring
        canvas.set_paint_alpha(geometry.outer_alpha as f32);
        Circle::with_center(center, diameter(geometry.outer_radius))
            .into_styled(PrimitiveStyle::with_fill(fill))
            .draw(canvas)
            .ok();

        // Static inner dot with outline
        canvas.set_paint_alpha(1.0);
        let dot_style = PrimitiveStyleBuilder::new()
            .fill_color(fill)
            .stroke_color(white)
            .stroke_width(OUTLINE_WIDTH)
            .stroke_alignment(StrokeAlignment::Center)
            .build();
        Circle::with_center(center, diameter(geometry.inner_radius))
            .into_styled(dot_style)
            .draw(canvas)
            .ok();
    }
}

/// Byte length of one RGBA frame, or `None` for sizes beyond [`MAX_ICON_SIZE`].
fn frame_len(size: u32) -> Option<usize> {
    if size > MAX_ICON_SIZE {
        return None;
    }
    (size as usize).checked_mul(size as usize)?.checked_mul(4)
}

fn diameter(radius: f64) -> u32 {
    (radius * 2.0).round().max(0.0) as u32
}

impl AnimatedImage for PulseIcon {
    fn dimensions(&self) -> (u32, u32) {
        (self.size, self.size)
    }

    fn on_add(&mut self) -> Result<(), IconError> {
        if self.size > MAX_ICON_SIZE {
            return Err(IconError::SurfaceUnavailable(format!(
                "{}px icons exceed the {}px limit",
                self.size, MAX_ICON_SIZE
            )));
        }
        match Canvas::new(self.size, self.size) {
            Some(canvas) => {
                self.surface = Some(canvas);
                Ok(())
            }
            None => Err(IconError::SurfaceUnavailable(format!(
                "cannot allocate a {}x{} canvas",
                self.size, self.size
            ))),
        }
    }

    fn render(&mut self, elapsed_ms: u64) -> bool {
        let geometry = self.geometry(elapsed_ms);
        let Some(canvas) = self.surface.as_mut() else {
            // Keep showing the last frame
            return false;
        };

        Self::draw_frame(canvas, self.style.color, &geometry);
        self.data.copy_from_slice(canvas.as_bytes());
        true
    }

    fn pixels(&self) -> &[u8] {
        &self.data
    }

    fn on_remove(&mut self) {
        self.surface = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskCategory;

    fn icon(category: RiskCategory) -> PulseIcon {
        let mut icon = PulseIcon::new(category.default_style(), DEFAULT_ICON_SIZE);
        icon.on_add().unwrap();
        icon
    }

    fn pixel(icon: &PulseIcon, x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * DEFAULT_ICON_SIZE + x) * 4) as usize;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&icon.pixels()[offset..offset + 4]);
        rgba
    }

    #[test]
    fn test_geometry_at_cycle_start() {
        let icon = icon(RiskCategory::Critical);
        let g = icon.geometry(0);
        assert_eq!(g.t, 0.0);
        assert!((g.inner_radius - 15.0).abs() < 1e-9);
        assert_eq!(g.outer_radius, g.inner_radius);
        assert!((g.outer_alpha - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_geometry_at_half_cycle() {
        let icon = icon(RiskCategory::Critical);
        let g = icon.geometry(600);
        assert!((g.t - 0.5).abs() < 1e-9);
        assert!((g.outer_alpha - 0.175).abs() < 1e-9);
        assert!((g.outer_radius - (g.inner_radius + 0.35 * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_geometry_wraps_at_period() {
        let icon = icon(RiskCategory::Low);
        assert_eq!(icon.geometry(2000), icon.geometry(0));
        assert_eq!(icon.geometry(2500), icon.geometry(500));

        let late = icon.geometry(1999);
        assert!(late.t < 1.0);
        assert!(late.outer_radius <= 50.0);
    }

    #[test]
    fn test_frames_are_periodic() {
        let mut icon = icon(RiskCategory::Healthy);
        assert!(icon.render(0));
        let first = icon.pixels().to_vec();

        assert!(icon.render(1234));
        assert_ne!(icon.pixels(), first.as_slice());

        assert!(icon.render(3000));
        assert_eq!(icon.pixels(), first.as_slice());
    }

    #[test]
    fn test_inner_dot_is_opaque_category_color() {
        let mut icon = icon(RiskCategory::Critical);
        icon.render(0);
        assert_eq!(pixel(&icon, 50, 50), [231, 76, 60, 255]);
        // Corners stay transparent
        assert_eq!(pixel(&icon, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&icon, 99, 99), [0, 0, 0, 0]);
    }

    #[test]
    fn test_outline_is_white() {
        let mut icon = icon(RiskCategory::Critical);
        icon.render(0);
        // Edge of the 15 px dot, on the horizontal axis
        let found_white = (63..=66).any(|x| pixel(&icon, x, 50) == [255, 255, 255, 255]);
        assert!(found_white, "expected a white outline pixel near x=65");
    }

    #[test]
    fn test_ring_alpha_mid_cycle() {
        let mut icon = icon(RiskCategory::Critical);
        icon.render(600);
        // 25 px from center: outside the dot, inside the 32.5 px ring
        let [r, g, b, a] = pixel(&icon, 75, 50);
        assert_eq!([r, g, b], [231, 76, 60]);
        assert!((40..=50).contains(&a), "ring alpha was {}", a);
    }

    #[test]
    fn test_buffer_cleared_between_frames() {
        let mut icon = icon(RiskCategory::Critical);
        icon.render(1100); // ring near full size
        assert_ne!(pixel(&icon, 90, 50)[3], 0);

        icon.render(0); // ring collapsed under the dot
        assert_eq!(pixel(&icon, 90, 50), [0, 0, 0, 0]);
    }

    #[test]
    fn test_render_without_surface_keeps_last_frame() {
        let mut icon = icon(RiskCategory::Low);
        icon.render(500);
        let frozen = icon.pixels().to_vec();

        icon.on_remove();
        assert!(!icon.has_surface());
        assert!(!icon.render(1500));
        assert_eq!(icon.pixels(), frozen.as_slice());
    }

    #[test]
    fn test_render_before_add_reports_no_change() {
        let mut icon = PulseIcon::new(RiskCategory::Low.default_style(), DEFAULT_ICON_SIZE);
        assert!(!icon.render(0));
        assert!(icon.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_sized_icon_has_no_surface() {
        let mut icon = PulseIcon::new(RiskCategory::Low.default_style(), 0);
        assert!(matches!(
            icon.on_add(),
            Err(IconError::SurfaceUnavailable(_))
        ));
        assert!(!icon.render(10));
        assert!(icon.pixels().is_empty());
    }

    #[test]
    fn test_oversized_icon_is_rejected() {
        let mut icon = PulseIcon::new(RiskCategory::Critical.default_style(), u32::MAX);
        assert!(icon.pixels().is_empty());
        assert!(matches!(
            icon.on_add(),
            Err(IconError::SurfaceUnavailable(_))
        ));
        assert!(!icon.render(0));

        let mut largest = PulseIcon::new(RiskCategory::Critical.default_style(), MAX_ICON_SIZE);
        assert!(largest.on_add().is_ok());
        assert_eq!(largest.pixels().len(), 1024 * 1024 * 4);
    }
}
