//! Composition layouts
//!
//! A layout describes how the two camera frames combine into one output
//! frame. The same placement geometry drives both the live compositor and
//! the offline merger.

use crate::capture::types::CameraPosition;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Margin between a picture-in-picture inset and the frame edge, in pixels
/// at render scale.
pub const PIP_MARGIN: u32 = 16;

/// Border stroke width around the picture-in-picture inset.
pub const PIP_BORDER: u32 = 3;

/// Width share of the designated primary source in the primary layout.
const PRIMARY_FRACTION: f64 = 0.75;

/// Corner anchors for the picture-in-picture inset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];
}

/// How two frames combine into one output frame.
///
/// Swapped wholesale by the caller; never partially mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CompositionLayout {
    /// Front on the left half, back on the right half
    SideBySide,
    /// Back full-frame with the front inset at a corner
    PictureInPicture { corner: Corner, size_fraction: f32 },
    /// The named source takes 75% of the width, the other the rest
    Primary { position: CameraPosition },
}

/// Target pixel dimensions of a composited output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned destination rectangle in output pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One source's destination in the output frame. Placements are returned in
/// draw order: base layers first, overlays last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub source: CameraPosition,
    pub rect: Rect,
    /// Draw a border stroke around this rect after the source
    pub border: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("size fraction {0} outside (0, 1)")]
    InvalidSizeFraction(f32),

    #[error("render size {0}x{1} too small to place both sources")]
    RenderTooSmall(u32, u32),
}

impl CompositionLayout {
    /// Validate layout parameters independent of any render size.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if let CompositionLayout::PictureInPicture { size_fraction, .. } = self {
            if !(*size_fraction > 0.0 && *size_fraction < 1.0) {
                return Err(LayoutError::InvalidSizeFraction(*size_fraction));
            }
        }
        Ok(())
    }

    /// Destination rectangles for both sources at the given render size,
    /// back-to-front: the overlay (when any) is always last.
    pub fn placements(&self, size: RenderSize) -> Result<Vec<Placement>, LayoutError> {
        self.validate()?;
        if size.width < 4 || size.height < 4 {
            return Err(LayoutError::RenderTooSmall(size.width, size.height));
        }
        // The inset needs at least one pixel inside the margins
        if matches!(self, CompositionLayout::PictureInPicture { .. })
            && (size.width <= 2 * PIP_MARGIN || size.height <= 2 * PIP_MARGIN)
        {
            return Err(LayoutError::RenderTooSmall(size.width, size.height));
        }

        let placements = match *self {
            CompositionLayout::SideBySide => {
                let half = size.width / 2;
                vec![
                    Placement {
                        source: CameraPosition::Front,
                        rect: Rect {
                            x: 0,
                            y: 0,
                            width: half,
                            height: size.height,
                        },
                        border: false,
                    },
                    Placement {
                        source: CameraPosition::Back,
                        rect: Rect {
                            x: half,
                            y: 0,
                            width: size.width - half,
                            height: size.height,
                        },
                        border: false,
                    },
                ]
            }
            CompositionLayout::PictureInPicture {
                corner,
                size_fraction,
            } => {
                let inset = inset_rect(size, corner, size_fraction);
                vec![
                    Placement {
                        source: CameraPosition::Back,
                        rect: Rect {
                            x: 0,
                            y: 0,
                            width: size.width,
                            height: size.height,
                        },
                        border: false,
                    },
                    Placement {
                        source: CameraPosition::Front,
                        rect: inset,
                        border: true,
                    },
                ]
            }
            CompositionLayout::Primary { position } => {
                let primary_width = (size.width as f64 * PRIMARY_FRACTION) as u32;
                vec![
                    Placement {
                        source: position,
                        rect: Rect {
                            x: 0,
                            y: 0,
                            width: primary_width,
                            height: size.height,
                        },
                        border: false,
                    },
                    Placement {
                        source: position.opposite(),
                        rect: Rect {
                            x: primary_width,
                            y: 0,
                            width: size.width - primary_width,
                            height: size.height,
                        },
                        border: false,
                    },
                ]
            }
        };

        Ok(placements)
    }
}

/// Inset rect for the picture-in-picture overlay. The scaled size is capped
/// so the inset always fits inside the frame minus the fixed margin, for any
/// fraction in (0,1).
fn inset_rect(size: RenderSize, corner: Corner, fraction: f32) -> Rect {
    let max_w = size.width.saturating_sub(2 * PIP_MARGIN).max(1);
    let max_h = size.height.saturating_sub(2 * PIP_MARGIN).max(1);

    let width = ((size.width as f64 * fraction as f64) as u32).clamp(1, max_w);
    let height = ((size.height as f64 * fraction as f64) as u32).clamp(1, max_h);

    let right_x = size.width.saturating_sub(width + PIP_MARGIN);
    let bottom_y = size.height.saturating_sub(height + PIP_MARGIN);
    let (x, y) = match corner {
        Corner::TopLeft => (PIP_MARGIN, PIP_MARGIN),
        Corner::TopRight => (right_x, PIP_MARGIN),
        Corner::BottomLeft => (PIP_MARGIN, bottom_y),
        Corner::BottomRight => (right_x, bottom_y),
    };

    Rect {
        x,
        y,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: RenderSize = RenderSize {
        width: 1280,
        height: 720,
    };

    #[test]
    fn side_by_side_splits_columns_exactly() {
        let placements = CompositionLayout::SideBySide.placements(SIZE).unwrap();
        assert_eq!(placements.len(), 2);

        let front = placements[0];
        let back = placements[1];
        assert_eq!(front.source, CameraPosition::Front);
        assert_eq!((front.rect.x, front.rect.right()), (0, 640));
        assert_eq!(back.source, CameraPosition::Back);
        assert_eq!((back.rect.x, back.rect.right()), (640, 1280));
        assert_eq!(front.rect.height, 720);
        assert_eq!(back.rect.height, 720);
    }

    #[test]
    fn side_by_side_covers_odd_widths() {
        let size = RenderSize::new(1281, 720);
        let placements = CompositionLayout::SideBySide.placements(size).unwrap();
        assert_eq!(placements[0].rect.right(), placements[1].rect.x);
        assert_eq!(placements[1].rect.right(), 1281);
    }

    #[test]
    fn pip_inset_stays_inside_frame_for_all_corners_and_fractions() {
        for corner in Corner::ALL {
            for step in 1..20 {
                let fraction = step as f32 / 20.0;
                let layout = CompositionLayout::PictureInPicture {
                    corner,
                    size_fraction: fraction,
                };
                let placements = layout.placements(SIZE).unwrap();
                let inset = placements[1].rect;

                assert!(inset.x >= PIP_MARGIN, "{corner:?} f={fraction}");
                assert!(inset.y >= PIP_MARGIN, "{corner:?} f={fraction}");
                assert!(inset.right() + PIP_MARGIN <= SIZE.width, "{corner:?} f={fraction}");
                assert!(inset.bottom() + PIP_MARGIN <= SIZE.height, "{corner:?} f={fraction}");
            }
        }
    }

    #[test]
    fn pip_rejects_frames_too_small_for_the_margin() {
        for corner in Corner::ALL {
            let layout = CompositionLayout::PictureInPicture {
                corner,
                size_fraction: 0.5,
            };
            for (w, h) in [(10, 10), (32, 720), (1280, 32)] {
                assert_eq!(
                    layout.placements(RenderSize::new(w, h)),
                    Err(LayoutError::RenderTooSmall(w, h)),
                    "{corner:?} {w}x{h}"
                );
            }

            // The smallest frame that holds the margin keeps the inset inside
            let size = RenderSize::new(33, 33);
            let inset = layout.placements(size).unwrap()[1].rect;
            assert!(inset.x >= PIP_MARGIN, "{corner:?}");
            assert!(inset.y >= PIP_MARGIN, "{corner:?}");
            assert!(inset.right() <= size.width, "{corner:?}");
            assert!(inset.bottom() <= size.height, "{corner:?}");
        }
    }

    #[test]
    fn pip_overlay_draws_last_over_full_base() {
        let layout = CompositionLayout::PictureInPicture {
            corner: Corner::BottomRight,
            size_fraction: 0.25,
        };
        let placements = layout.placements(SIZE).unwrap();
        assert_eq!(placements[0].source, CameraPosition::Back);
        assert_eq!(placements[0].rect.width, SIZE.width);
        assert_eq!(placements[1].source, CameraPosition::Front);
        assert!(placements[1].border);
    }

    #[test]
    fn pip_rejects_degenerate_fractions() {
        for bad in [0.0, 1.0, -0.5, 1.5] {
            let layout = CompositionLayout::PictureInPicture {
                corner: Corner::TopLeft,
                size_fraction: bad,
            };
            assert_eq!(
                layout.validate(),
                Err(LayoutError::InvalidSizeFraction(bad))
            );
        }
    }

    #[test]
    fn primary_takes_three_quarters() {
        let layout = CompositionLayout::Primary {
            position: CameraPosition::Back,
        };
        let placements = layout.placements(SIZE).unwrap();
        assert_eq!(placements[0].source, CameraPosition::Back);
        assert_eq!(placements[0].rect.width, 960);
        assert_eq!(placements[1].source, CameraPosition::Front);
        assert_eq!(placements[1].rect.x, 960);
        assert_eq!(placements[1].rect.right(), 1280);
    }

    #[test]
    fn layouts_round_trip_through_serde() {
        let layout = CompositionLayout::PictureInPicture {
            corner: Corner::TopRight,
            size_fraction: 0.3,
        };
        let json = serde_json::to_string(&layout).unwrap();
        let parsed: CompositionLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, layout);
    }
}
