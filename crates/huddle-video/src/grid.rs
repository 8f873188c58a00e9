use std::collections::HashMap;
use std::sync::Arc;

use huddle_core::layout::LayoutSpec;
use huddle_core::session::TileBoard;
use serde::Serialize;

use crate::canvas::SyntheticStreamFactory;
use crate::tile::{RenderedTile, TileRenderer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedGrid {
    pub layout: LayoutSpec,
    pub template_areas: String,
    pub tiles: Vec<RenderedTile>,
    /// "+N more" when the roster outgrows the grid.
    pub overflow_badge: Option<String>,
}

/// Keeps one [`TileRenderer`] per visible participant across renders.
pub struct GridRenderer {
    factory: Arc<dyn SyntheticStreamFactory>,
    renderers: HashMap<String, TileRenderer>,
}

impl GridRenderer {
    pub fn new(factory: Arc<dyn SyntheticStreamFactory>) -> Self {
        Self {
            factory,
            renderers: HashMap::new(),
        }
    }

    pub fn render(&mut self, board: &TileBoard) -> RenderedGrid {
        let before = self.renderers.len();
        self.renderers
            .retain(|id, _| board.tiles.iter().any(|t| t.participant.id == *id));
        if self.renderers.len() != before {
            tracing::debug!(
                released = before - self.renderers.len(),
                "dropped renderers for tiles no longer shown"
            );
        }

        let tiles = board
            .tiles
            .iter()
            .map(|tile| {
                let id = &tile.participant.id;
                self.renderers
                    .entry(id.clone())
                    .or_insert_with(|| TileRenderer::new(id.clone(), self.factory.clone()))
                    .render(tile)
            })
            .collect();

        let overflow = board.hidden.len();
        RenderedGrid {
            template_areas: board.spec.css_template_areas(),
            layout: board.spec.clone(),
            tiles,
            overflow_badge: (overflow > 0).then(|| format!("+{overflow} more")),
        }
    }

    /// Number of live placeholder streams.
    pub fn placeholder_count(&self) -> usize {
        self.renderers
            .values()
            .filter(|r| r.placeholder().is_some())
            .count()
    }

    /// Release every tile.
    pub fn clear(&mut self) {
        self.renderers.clear();
    }
}
