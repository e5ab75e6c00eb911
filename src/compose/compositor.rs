//! Live frame composition
//!
//! Combines one front + one back frame into a single output buffer on every
//! capture tick. Scaling is an independent X/Y nearest-neighbor transform
//! (no aspect lock) and sources are drawn back-to-front so overlays stay
//! visible. Output buffers come from a pool so the hot path never allocates.

use crate::capture::types::{FrameBuffer, FrameSource, PixelFormat};
use crate::compose::layout::{CompositionLayout, LayoutError, Rect, RenderSize, PIP_BORDER};
use crate::compose::pool::BufferPool;
use thiserror::Error;

/// RGBA stroke color for the picture-in-picture border
const BORDER_RGBA: [u8; 4] = [255, 255, 255, 255];

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("pixel-buffer pool exhausted, dropping composited frame")]
    BufferExhausted,

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Per-tick compositor for the two live streams.
pub struct FrameCompositor {
    pool: BufferPool,
    format: PixelFormat,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self {
            pool: BufferPool::default(),
            format: PixelFormat::Rgba8,
        }
    }

    pub fn with_pool(pool: BufferPool) -> Self {
        Self {
            pool,
            format: PixelFormat::Rgba8,
        }
    }

    /// Clear idle pooled buffers. Wired to the embedder's low-memory signal;
    /// safe between ticks, frames still referenced are unaffected.
    pub fn release_pooled_buffers(&self) {
        self.pool.clear();
    }

    /// Combine one front and one back frame into a pooled output frame.
    ///
    /// A pool miss is reported as [`ComposeError::BufferExhausted`]; the
    /// caller drops that tick's output rather than stalling the streams.
    pub fn composite(
        &self,
        front: &FrameBuffer,
        back: &FrameBuffer,
        layout: &CompositionLayout,
        render_size: RenderSize,
    ) -> Result<FrameBuffer, ComposeError> {
        let placements = layout.placements(render_size)?;

        let mut out = self
            .pool
            .acquire(render_size.width, render_size.height, self.format)
            .ok_or_else(|| {
                tracing::warn!(
                    width = render_size.width,
                    height = render_size.height,
                    "composited frame dropped: pool exhausted"
                );
                ComposeError::BufferExhausted
            })?;

        fill_opaque_black(&mut out);

        for placement in &placements {
            let source = match placement.source {
                pos if front.source() == FrameSource::Camera(pos) => front,
                _ => back,
            };
            draw_scaled(&mut out, render_size, source, placement.rect);
            if placement.border {
                stroke_border(&mut out, render_size, placement.rect);
            }
        }

        // The composited tick carries the later of the two source timestamps
        let pts = front.pts().max(back.pts());
        Ok(FrameBuffer::from_pooled(
            out,
            render_size.width,
            render_size.height,
            self.format,
            pts,
            FrameSource::Composite,
        ))
    }
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_opaque_black(dest: &mut [u8]) {
    for pixel in dest.chunks_exact_mut(4) {
        pixel[0] = 0;
        pixel[1] = 0;
        pixel[2] = 0;
        pixel[3] = 255;
    }
}

/// Scale `src` into `rect` with independent X/Y factors, nearest neighbor.
fn draw_scaled(dest: &mut [u8], dest_size: RenderSize, src: &FrameBuffer, rect: Rect) {
    let src_data = src.data();
    let src_w = src.width();
    let src_h = src.height();
    if src_w == 0 || src_h == 0 || rect.width == 0 || rect.height == 0 {
        return;
    }

    for dy in 0..rect.height {
        let dest_y = rect.y + dy;
        if dest_y >= dest_size.height {
            continue;
        }
        let src_y = ((dy as u64 * src_h as u64) / rect.height as u64).min(src_h as u64 - 1) as u32;

        for dx in 0..rect.width {
            let dest_x = rect.x + dx;
            if dest_x >= dest_size.width {
                continue;
            }
            let src_x =
                ((dx as u64 * src_w as u64) / rect.width as u64).min(src_w as u64 - 1) as u32;

            let src_idx = ((src_y * src_w + src_x) * 4) as usize;
            let dest_idx = ((dest_y * dest_size.width + dest_x) * 4) as usize;

            if src_idx + 3 >= src_data.len() || dest_idx + 3 >= dest.len() {
                continue;
            }

            dest[dest_idx] = src_data[src_idx];
            dest[dest_idx + 1] = src_data[src_idx + 1];
            dest[dest_idx + 2] = src_data[src_idx + 2];
            dest[dest_idx + 3] = 255;
        }
    }
}

/// Stroke a border just inside the rect bounds.
fn stroke_border(dest: &mut [u8], dest_size: RenderSize, rect: Rect) {
    let stroke = PIP_BORDER.min(rect.width / 2).min(rect.height / 2);

    for dy in 0..rect.height {
        for dx in 0..rect.width {
            let on_edge = dx < stroke
                || dy < stroke
                || dx >= rect.width - stroke
                || dy >= rect.height - stroke;
            if !on_edge {
                continue;
            }

            let x = rect.x + dx;
            let y = rect.y + dy;
            if x >= dest_size.width || y >= dest_size.height {
                continue;
            }
            let idx = ((y * dest_size.width + x) * 4) as usize;
            if idx + 3 < dest.len() {
                dest[idx..idx + 4].copy_from_slice(&BORDER_RGBA);
            }
        }
    }
}
