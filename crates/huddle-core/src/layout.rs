//! Grid layout engine.
//!
//! Maps a participant count and an optional pin onto a CSS grid
//! description. Pure: the same inputs always give the same spec, so the
//! grid only reflows when the count or the pin actually changes.

use serde::Serialize;

/// Horizontal gap between cells, in px.
const GRID_GAP: u32 = 12;
/// Width cap for the lone centred tile.
const SINGLE_MAX_WIDTH: u32 = 960;
const SINGLE_MIN_HEIGHT: u32 = 360;
const PAIR_MIN_HEIGHT: u32 = 240;
const QUAD_MIN_HEIGHT: u32 = 480;
const PINNED_MIN_HEIGHT: u32 = 520;

/// Named grid areas, in fill order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridArea {
    Single,
    Pinned,
    First,
    Second,
    Third,
    Fourth,
}

impl GridArea {
    pub fn as_str(self) -> &'static str {
        match self {
            GridArea::Single => "single",
            GridArea::Pinned => "pinned",
            GridArea::First => "first",
            GridArea::Second => "second",
            GridArea::Third => "third",
            GridArea::Fourth => "fourth",
        }
    }
}

/// Fixed slot order used by every unpinned layout.
pub const SLOT_ORDER: [GridArea; 5] = [
    GridArea::Single,
    GridArea::First,
    GridArea::Second,
    GridArea::Third,
    GridArea::Fourth,
];

const STRIP_SLOTS: [GridArea; 2] = [GridArea::First, GridArea::Second];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Single,
    Pair,
    Quad,
    Pinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const WIDESCREEN: AspectRatio = AspectRatio {
        width: 16,
        height: 9,
    };

    pub fn as_f64(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutSpec {
    pub kind: LayoutKind,
    pub template_areas: Vec<Vec<GridArea>>,
    pub rows: String,
    pub columns: String,
    pub aspect_ratio: AspectRatio,
    pub min_height: u32,
    pub max_width: Option<u32>,
    pub gap: u32,
    /// Participants that did not get a cell ("+N more").
    pub overflow: usize,
}

impl LayoutSpec {
    /// Value for CSS `grid-template-areas`.
    pub fn css_template_areas(&self) -> String {
        self.template_areas
            .iter()
            .map(|row| {
                let names: Vec<&str> = row.iter().map(|a| a.as_str()).collect();
                format!("\"{}\"", names.join(" "))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Distinct areas in the template, in fill order.
    pub fn slots(&self) -> Vec<GridArea> {
        match self.kind {
            LayoutKind::Single => vec![SLOT_ORDER[0]],
            LayoutKind::Pair => STRIP_SLOTS.to_vec(),
            LayoutKind::Quad => SLOT_ORDER[1..].to_vec(),
            LayoutKind::Pinned => {
                let mut slots = vec![GridArea::Pinned];
                slots.extend(STRIP_SLOTS);
                slots
            }
        }
    }

    pub fn contains_area(&self, area: GridArea) -> bool {
        self.template_areas.iter().flatten().any(|a| *a == area)
    }
}

/// Compute the grid for `count` participants, with or without a pin.
pub fn compute_layout(count: usize, pinned: bool) -> LayoutSpec {
    if pinned && count > 0 {
        let visible = count.min(1 + STRIP_SLOTS.len());
        return LayoutSpec {
            kind: LayoutKind::Pinned,
            template_areas: vec![
                vec![GridArea::Pinned, GridArea::Pinned],
                STRIP_SLOTS.to_vec(),
            ],
            rows: "3.5fr 1fr".into(),
            columns: "1fr 1fr".into(),
            aspect_ratio: AspectRatio::WIDESCREEN,
            min_height: PINNED_MIN_HEIGHT,
            max_width: None,
            gap: GRID_GAP,
            overflow: count - visible,
        };
    }

    match count {
        0 | 1 => LayoutSpec {
            kind: LayoutKind::Single,
            template_areas: vec![vec![GridArea::Single]],
            rows: "1fr".into(),
            columns: "1fr".into(),
            aspect_ratio: AspectRatio::WIDESCREEN,
            min_height: SINGLE_MIN_HEIGHT,
            max_width: Some(SINGLE_MAX_WIDTH),
            gap: GRID_GAP,
            overflow: 0,
        },
        2 => LayoutSpec {
            kind: LayoutKind::Pair,
            template_areas: vec![STRIP_SLOTS.to_vec()],
            rows: "1fr".into(),
            columns: "1fr 1fr".into(),
            aspect_ratio: AspectRatio::WIDESCREEN,
            min_height: PAIR_MIN_HEIGHT,
            max_width: None,
            gap: GRID_GAP,
            overflow: 0,
        },
        _ => LayoutSpec {
            kind: LayoutKind::Quad,
            template_areas: vec![
                vec![GridArea::First, GridArea::Second],
                vec![GridArea::Third, GridArea::Fourth],
            ],
            rows: "1fr 1fr".into(),
            columns: "1fr 1fr".into(),
            aspect_ratio: AspectRatio::WIDESCREEN,
            min_height: QUAD_MIN_HEIGHT,
            max_width: None,
            gap: GRID_GAP,
            overflow: count.saturating_sub(SLOT_ORDER.len() - 1),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TilePlacement {
    pub participant_id: String,
    pub area: GridArea,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arrangement {
    pub spec: LayoutSpec,
    pub placements: Vec<TilePlacement>,
    /// Participants left out of the grid, in roster order.
    pub hidden: Vec<String>,
}

impl Arrangement {
    pub fn area_of(&self, participant_id: &str) -> Option<GridArea> {
        self.placements
            .iter()
            .find(|p| p.participant_id == participant_id)
            .map(|p| p.area)
    }
}

/// Assign roster entries to grid areas.
///
/// A pin naming someone who is not in `ids` is ignored.
pub fn arrange(ids: &[&str], pinned_id: Option<&str>) -> Arrangement {
    let pinned = pinned_id.filter(|pid| ids.contains(pid));
    let spec = compute_layout(ids.len(), pinned.is_some());

    let mut order: Vec<&str> = Vec::with_capacity(ids.len());
    if let Some(pid) = pinned {
        order.push(pid);
    }
    order.extend(ids.iter().copied().filter(|id| Some(*id) != pinned));

    let slots = spec.slots();
    let placements: Vec<TilePlacement> = order
        .iter()
        .zip(slots.iter())
        .map(|(id, area)| TilePlacement {
            participant_id: (*id).to_string(),
            area: *area,
        })
        .collect();
    let hidden = order
        .iter()
        .skip(placements.len())
        .map(|id| (*id).to_string())
        .collect();

    Arrangement {
        spec,
        placements,
        hidden,
    }
}
