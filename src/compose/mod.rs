//! Frame composition
//!
//! Layout geometry shared by the live and offline paths, the pooled pixel
//! buffers backing per-tick output, and the compositor itself.

pub mod compositor;
pub mod layout;
pub mod pool;

pub use compositor::{ComposeError, FrameCompositor};
pub use layout::{CompositionLayout, Corner, Placement, Rect, RenderSize};
pub use pool::{BufferPool, PooledPixels};
