//! Sprite-sheet composition and unpacking.
//!
//! [`compose`] pastes cell images onto one transparent canvas in the
//! layout's row-major order. [`unpack`] does the reverse for a
//! composite returned by a provider, which is not trusted to honour
//! the requested canvas size: the cell pitch is derived from the
//! composite's actual dimensions, and cells that come back at a
//! different size are resampled with nearest-neighbour so pixel art
//! keeps hard edges.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::error::CoreError;
use crate::grid::{CellPosition, GridLayout};

/// Fully transparent pixel used for empty canvas area.
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

/// Decode image bytes in any enabled format.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, CoreError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Encode an RGBA image as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CoreError> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

/// Re-encode arbitrary image bytes as an RGBA PNG.
pub fn normalize_png(bytes: &[u8]) -> Result<Vec<u8>, CoreError> {
    encode_png(&decode(bytes)?.to_rgba8())
}

// ---------------------------------------------------------------------------
// Compose
// ---------------------------------------------------------------------------

/// Paste `cells` onto a transparent canvas of the layout's footprint.
pub fn compose(layout: &GridLayout, cells: &[DynamicImage]) -> Result<RgbaImage, CoreError> {
    if cells.len() > layout.capacity() {
        return Err(CoreError::GridOverflow {
            count: cells.len(),
            rows: layout.rows,
            cols: layout.cols,
        });
    }

    let mut canvas =
        RgbaImage::from_pixel(layout.canvas_width(), layout.canvas_height(), TRANSPARENT);
    for (i, cell) in cells.iter().enumerate() {
        let (x, y) = layout.cell_origin(layout.position(i));
        imageops::replace(&mut canvas, &cell.to_rgba8(), i64::from(x), i64::from(y));
    }
    Ok(canvas)
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

/// Per-axis geometry derived from the composite's actual size.
#[derive(Debug, Clone, Copy)]
struct Axis {
    /// Distance between the starts of adjacent cells.
    pitch: f64,
    /// Size of one cell on the composite.
    extent: u32,
}

impl Axis {
    fn derive(actual: u32, requested_canvas: u32, cell: u32, padding: u32) -> Self {
        let scale = if requested_canvas == 0 {
            1.0
        } else {
            f64::from(actual) / f64::from(requested_canvas)
        };
        Self {
            pitch: f64::from(cell + padding) * scale,
            extent: ((f64::from(cell) * scale).round() as u32).max(1),
        }
    }

    fn start(&self, index: u32) -> u32 {
        (f64::from(index) * self.pitch).round() as u32
    }
}

/// Decode a composite and split it into `rows * cols` cells.
///
/// An undecodable composite is an error for the whole batch.
pub fn unpack_bytes(bytes: &[u8], layout: &GridLayout) -> Result<Vec<RgbaImage>, CoreError> {
    let composite = decode(bytes)?;
    Ok(unpack(&composite, layout))
}

/// Split a composite into one image per layout cell, in row-major order.
///
/// Always returns exactly `layout.capacity()` images, each sized to the
/// layout's cell dimensions. Cells past the batch's item count are
/// returned too; callers discard them.
///
/// Cell footprints follow the ratio of the composite's actual size to
/// the requested canvas, applied to the padded pitch. With zero padding
/// this is exactly `composite / (cols, rows)` per cell; with padding the
/// gutters are scaled along with the cells.
pub fn unpack(composite: &DynamicImage, layout: &GridLayout) -> Vec<RgbaImage> {
    let sheet = composite.to_rgba8();
    let (width, height) = sheet.dimensions();
    let x_axis = Axis::derive(width, layout.canvas_width(), layout.cell_width, layout.padding);
    let y_axis = Axis::derive(
        height,
        layout.canvas_height(),
        layout.cell_height,
        layout.padding,
    );

    layout
        .positions()
        .map(|pos| extract_cell(&sheet, layout, x_axis, y_axis, pos))
        .collect()
}

fn extract_cell(
    sheet: &RgbaImage,
    layout: &GridLayout,
    x_axis: Axis,
    y_axis: Axis,
    pos: CellPosition,
) -> RgbaImage {
    let (sheet_w, sheet_h) = sheet.dimensions();
    let x = x_axis.start(pos.col);
    let y = y_axis.start(pos.row);
    let w = x_axis.extent.min(sheet_w.saturating_sub(x));
    let h = y_axis.extent.min(sheet_h.saturating_sub(y));

    if w == 0 || h == 0 {
        return RgbaImage::from_pixel(layout.cell_width, layout.cell_height, TRANSPARENT);
    }

    let cell = imageops::crop_imm(sheet, x, y, w, h).to_image();
    if (w, h) == (layout.cell_width, layout.cell_height) {
        cell
    } else {
        imageops::resize(&cell, layout.cell_width, layout.cell_height, FilterType::Nearest)
    }
}
