//! Freehand stroke (a "line" on the wire).

use super::{ObjectId, default_opacity, default_scale, new_object_id};
use kurbo::{Affine, Point};
use serde::{Deserialize, Serialize};

/// Default stroke color for new strokes.
pub const DEFAULT_STROKE_COLOR: &str = "#000000";

/// Default stroke width for new strokes.
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

/// Opacity applied to highlighter strokes.
pub const HIGHLIGHTER_OPACITY: f64 = 0.5;

/// Drawing tool that produced a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeTool {
    #[default]
    Pencil,
    Highlighter,
    /// Eraser gestures are recorded as deletion intents, never rendered.
    #[serde(rename = "eraser", alias = "eraser-marker")]
    EraserMarker,
}

impl StrokeTool {
    /// Whether strokes drawn with this tool end up on the board.
    pub fn is_visible(self) -> bool {
        !matches!(self, StrokeTool::EraserMarker)
    }
}

/// A freehand stroke.
///
/// Points are stored flat (`[x0, y0, x1, y1, ...]`) relative to the stroke's
/// own origin; `x`/`y`, scale and rotation place it on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: ObjectId,
    #[serde(default)]
    pub points: Vec<f64>,
    #[serde(default = "default_color")]
    pub stroke: String,
    #[serde(default = "default_width")]
    pub stroke_width: f64,
    #[serde(default)]
    pub tool: StrokeTool,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_scale")]
    pub scale_x: f64,
    #[serde(default = "default_scale")]
    pub scale_y: f64,
    /// Rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub tension: f64,
}

fn default_color() -> String {
    DEFAULT_STROKE_COLOR.to_string()
}

fn default_width() -> f64 {
    DEFAULT_STROKE_WIDTH
}

impl Stroke {
    /// Create a new empty stroke for the given tool.
    pub fn new(tool: StrokeTool, color: impl Into<String>, width: f64) -> Self {
        Self {
            id: new_object_id(),
            points: Vec::new(),
            stroke: color.into(),
            stroke_width: width,
            tool,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            opacity: if tool == StrokeTool::Highlighter {
                HIGHLIGHTER_OPACITY
            } else {
                1.0
            },
            closed: false,
            tension: 0.5,
        }
    }

    /// Create from flat coordinates.
    pub fn from_points(points: Vec<f64>) -> Self {
        Self {
            points,
            ..Self::new(StrokeTool::Pencil, DEFAULT_STROKE_COLOR, DEFAULT_STROKE_WIDTH)
        }
    }

    /// Builder-style id override, mostly useful when decoding or testing.
    pub fn with_id(mut self, id: impl Into<ObjectId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a point to the path.
    pub fn add_point(&mut self, point: Point) {
        self.points.push(point.x);
        self.points.push(point.y);
    }

    /// Number of complete points.
    pub fn len(&self) -> usize {
        self.points.len() / 2
    }

    /// Check if the stroke has no complete point.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over complete points in local coordinates.
    ///
    /// A dangling trailing coordinate is ignored.
    pub fn local_points(&self) -> impl Iterator<Item = Point> + '_ {
        self.points
            .chunks_exact(2)
            .map(|pair| Point::new(pair[0], pair[1]))
    }

    /// Local-to-board transform: translate, then rotate, then scale.
    pub fn transform(&self) -> Affine {
        Affine::translate((self.x, self.y))
            * Affine::rotate(self.rotation.to_radians())
            * Affine::scale_non_uniform(self.scale_x, self.scale_y)
    }

    /// Merge a partial update into this stroke.
    pub fn apply_patch(&mut self, patch: &StrokePatch) {
        if let Some(points) = &patch.points {
            self.points = points.clone();
        }
        if let Some(color) = &patch.stroke {
            self.stroke = color.clone();
        }
        if let Some(width) = patch.stroke_width {
            self.stroke_width = width;
        }
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(scale_x) = patch.scale_x {
            self.scale_x = scale_x;
        }
        if let Some(scale_y) = patch.scale_y {
            self.scale_y = scale_y;
        }
        if let Some(rotation) = patch.rotation {
            self.rotation = rotation;
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity;
        }
        if let Some(tool) = patch.tool {
            self.tool = tool;
        }
        if let Some(closed) = patch.closed {
            self.closed = closed;
        }
        if let Some(tension) = patch.tension {
            self.tension = tension;
        }
    }
}

/// Sparse update for a stroke. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<StrokeTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tension: Option<f64>,
}

impl StrokePatch {
    /// Patch that moves a stroke to a new origin.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Patch that sets the scale factors.
    pub fn scale(scale_x: f64, scale_y: f64) -> Self {
        Self {
            scale_x: Some(scale_x),
            scale_y: Some(scale_y),
            ..Self::default()
        }
    }

    /// Patch that sets the rotation in degrees.
    pub fn rotation(degrees: f64) -> Self {
        Self {
            rotation: Some(degrees),
            ..Self::default()
        }
    }

    /// Check if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
