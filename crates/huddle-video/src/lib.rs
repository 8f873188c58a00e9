//! Video tile rendering.
//!
//! Turns the session's tile board into renderable tile view models and
//! synthesizes placeholder streams for participants whose video is on but
//! who have no real stream yet.

mod font;

pub mod canvas;
pub mod grid;
pub mod tile;

pub use canvas::{CanvasStreamFactory, SyntheticStream, SyntheticStreamFactory};
pub use grid::{GridRenderer, RenderedGrid};
pub use tile::{BackgroundEffect, RenderedTile, TileBadge, TileRenderer, TileSource};
