//! Operation codec.
//!
//! An [`Operation`] is the unit of wire transmission and of history replay:
//! one user-level mutation plus the id of the client that issued it. This
//! module builds operations from local edits, converts them to and from the
//! operations-table row shape, and computes the bounding boxes used for
//! "jump to last activity".

use crate::board::BoardState;
use crate::error::SyncError;
use crate::shapes::{Image, ImagePatch, ObjectId, Stroke, StrokePatch, new_object_id};
use crate::sync::OperationRow;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Operation tag, identical to the `action_type` column vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Draw,
    Erase,
    AddImage,
    UpdateImage,
    DeleteObjects,
    UpdateLine,
    Undo,
    Redo,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Draw => "draw",
            OperationKind::Erase => "erase",
            OperationKind::AddImage => "add_image",
            OperationKind::UpdateImage => "update_image",
            OperationKind::DeleteObjects => "delete_objects",
            OperationKind::UpdateLine => "update_line",
            OperationKind::Undo => "undo",
            OperationKind::Redo => "redo",
        }
    }

    /// Undo and redo move the history index instead of changing the board.
    pub fn is_history_marker(&self) -> bool {
        matches!(self, OperationKind::Undo | OperationKind::Redo)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draw" => Ok(OperationKind::Draw),
            "erase" => Ok(OperationKind::Erase),
            "add_image" => Ok(OperationKind::AddImage),
            "update_image" => Ok(OperationKind::UpdateImage),
            "delete_objects" => Ok(OperationKind::DeleteObjects),
            "update_line" => Ok(OperationKind::UpdateLine),
            "undo" => Ok(OperationKind::Undo),
            "redo" => Ok(OperationKind::Redo),
            other => Err(SyncError::MalformedRow {
                action: other.to_string(),
                reason: "unknown action type".to_string(),
            }),
        }
    }
}

/// Operation-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Payload {
    /// A finished stroke.
    Draw { line: Stroke },
    /// Strokes removed by an eraser gesture.
    Erase { line_ids: Vec<ObjectId> },
    /// A pasted image.
    AddImage { image: Image },
    /// Partial update of an image (move, resize, rotate, lock).
    UpdateImage { id: ObjectId, changes: ImagePatch },
    /// Deletion of a selection.
    DeleteObjects {
        #[serde(default)]
        line_ids: Vec<ObjectId>,
        #[serde(default)]
        image_ids: Vec<ObjectId>,
    },
    /// Partial update of a stroke (move, resize, rotate).
    UpdateLine { id: ObjectId, changes: StrokePatch },
    Undo,
    Redo,
}

impl Payload {
    pub fn kind(&self) -> OperationKind {
        match self {
            Payload::Draw { .. } => OperationKind::Draw,
            Payload::Erase { .. } => OperationKind::Erase,
            Payload::AddImage { .. } => OperationKind::AddImage,
            Payload::UpdateImage { .. } => OperationKind::UpdateImage,
            Payload::DeleteObjects { .. } => OperationKind::DeleteObjects,
            Payload::UpdateLine { .. } => OperationKind::UpdateLine,
            Payload::Undo => OperationKind::Undo,
            Payload::Redo => OperationKind::Redo,
        }
    }
}

/// One serialized document mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(flatten)]
    pub payload: Payload,
    pub sender_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Operation {
    /// Create an operation stamped with the current time.
    pub fn new(payload: Payload, sender_id: impl Into<String>) -> Self {
        Self {
            payload,
            sender_id: sender_id.into(),
            timestamp: now_millis(),
        }
    }

    /// Builder-style timestamp override.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Id of the single object this operation targets, if there is exactly one.
    pub fn primary_object_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Draw { line } => Some(&line.id),
            Payload::AddImage { image } => Some(&image.id),
            Payload::UpdateImage { id, .. } | Payload::UpdateLine { id, .. } => Some(id),
            Payload::Erase { line_ids } if line_ids.len() == 1 => Some(&line_ids[0]),
            _ => None,
        }
    }

    /// Bounds of what this operation touched.
    ///
    /// Additions and updates are measured in `after`; removals in `before`,
    /// since the objects are gone afterwards.
    pub fn activity_bounds(&self, before: &BoardState, after: &BoardState) -> Bounds {
        match &self.payload {
            Payload::Draw { line } => calculate_bounds(line),
            Payload::AddImage { image } => calculate_bounds(image),
            Payload::UpdateLine { id, .. } => after.line(id).map(calculate_bounds).unwrap_or_default(),
            Payload::UpdateImage { id, .. } => after.image(id).map(calculate_bounds).unwrap_or_default(),
            Payload::Erase { line_ids } => line_ids
                .iter()
                .filter_map(|id| before.line(id))
                .map(calculate_bounds)
                .fold(Bounds::ZERO, Bounds::union),
            Payload::DeleteObjects { line_ids, image_ids } => {
                let lines = line_ids.iter().filter_map(|id| before.line(id)).map(calculate_bounds);
                let images = image_ids.iter().filter_map(|id| before.image(id)).map(calculate_bounds);
                lines.chain(images).fold(Bounds::ZERO, Bounds::union)
            }
            Payload::Undo | Payload::Redo => Bounds::ZERO,
        }
    }

    /// Convert to an operations-table row.
    ///
    /// `object_data` holds the payload body without its tag; the tag goes to
    /// `action_type`. Operations without a single target get a fresh
    /// `object_id`.
    pub fn to_row(&self, board_id: &str, session_id: &str) -> Result<OperationRow, SyncError> {
        let mut object_data = serde_json::to_value(&self.payload)?;
        if let Some(map) = object_data.as_object_mut() {
            map.remove("type");
        }

        Ok(OperationRow {
            id: new_object_id(),
            seq: 0,
            action_type: self.kind().as_str().to_string(),
            board_id: board_id.to_string(),
            object_data,
            object_id: self
                .primary_object_id()
                .map(str::to_string)
                .unwrap_or_else(new_object_id),
            session_id: session_id.to_string(),
            user_id: self.sender_id.clone(),
            created_at: format_timestamp(self.timestamp),
        })
    }

    /// Convert an operations-table row back into an operation.
    pub fn from_row(row: &OperationRow) -> Result<Self, SyncError> {
        let kind: OperationKind = row.action_type.parse()?;

        let mut body = match &row.object_data {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(SyncError::MalformedRow {
                    action: row.action_type.clone(),
                    reason: format!("object_data is not an object: {}", other),
                });
            }
        };
        body.insert("type".to_string(), serde_json::Value::from(kind.as_str()));

        let payload: Payload =
            serde_json::from_value(serde_json::Value::Object(body)).map_err(|e| {
                SyncError::MalformedRow {
                    action: row.action_type.clone(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            payload,
            sender_id: row.user_id.clone(),
            timestamp: parse_timestamp(&row.created_at),
        })
    }
}

/// Format epoch milliseconds as RFC 3339.
pub fn format_timestamp(millis: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Parse an RFC 3339 timestamp into epoch milliseconds (0 when unparsable).
pub fn parse_timestamp(text: &str) -> u64 {
    match OffsetDateTime::parse(text, &Rfc3339) {
        Ok(t) => u64::try_from(t.unix_timestamp_nanos() / 1_000_000).unwrap_or(0),
        Err(e) => {
            log::warn!("Unparsable created_at '{}': {}", text, e);
            0
        }
    }
}

// --- Constructors, one per kind ---

pub fn serialize_draw_operation(line: &Stroke, sender_id: &str) -> Operation {
    Operation::new(Payload::Draw { line: line.clone() }, sender_id)
}

pub fn serialize_erase_operation(line_ids: Vec<ObjectId>, sender_id: &str) -> Operation {
    Operation::new(Payload::Erase { line_ids }, sender_id)
}

pub fn serialize_add_image_operation(image: &Image, sender_id: &str) -> Operation {
    Operation::new(Payload::AddImage { image: image.clone() }, sender_id)
}

pub fn serialize_update_image_operation(id: &str, changes: ImagePatch, sender_id: &str) -> Operation {
    Operation::new(
        Payload::UpdateImage {
            id: id.to_string(),
            changes,
        },
        sender_id,
    )
}

pub fn serialize_delete_objects_operation(
    line_ids: Vec<ObjectId>,
    image_ids: Vec<ObjectId>,
    sender_id: &str,
) -> Operation {
    Operation::new(Payload::DeleteObjects { line_ids, image_ids }, sender_id)
}

pub fn serialize_update_line_operation(id: &str, changes: StrokePatch, sender_id: &str) -> Operation {
    Operation::new(
        Payload::UpdateLine {
            id: id.to_string(),
            changes,
        },
        sender_id,
    )
}

pub fn serialize_undo_operation(sender_id: &str) -> Operation {
    Operation::new(Payload::Undo, sender_id)
}

pub fn serialize_redo_operation(sender_id: &str) -> Operation {
    Operation::new(Payload::Redo, sender_id)
}

// --- Bounds ---

/// Axis-aligned bounding box in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const ZERO: Bounds = Bounds {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub fn from_rect(rect: Rect) -> Self {
        Self {
            x: rect.x0,
            y: rect.y0,
            width: rect.width(),
            height: rect.height(),
        }
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// A box with no area means "no visible activity".
    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Smallest box containing both; degenerate boxes are ignored.
    pub fn union(self, other: Bounds) -> Bounds {
        match (self.is_degenerate(), other.is_degenerate()) {
            (true, _) => other,
            (_, true) => self,
            _ => Bounds::from_rect(self.to_rect().union(other.to_rect())),
        }
    }

    /// Center point, used to scroll the view to an activity.
    pub fn center(&self) -> Point {
        self.to_rect().center()
    }
}

/// Object whose bounds can be measured.
#[derive(Debug, Clone, Copy)]
pub enum BoundsSource<'a> {
    Stroke(&'a Stroke),
    Image(&'a Image),
}

impl<'a> From<&'a Stroke> for BoundsSource<'a> {
    fn from(stroke: &'a Stroke) -> Self {
        BoundsSource::Stroke(stroke)
    }
}

impl<'a> From<&'a Image> for BoundsSource<'a> {
    fn from(image: &'a Image) -> Self {
        BoundsSource::Image(image)
    }
}

/// Tight axis-aligned bounds of a stroke or image on the board.
///
/// Strokes: every point goes through the stroke's transform, and the box is
/// padded by half the stroke width scaled by the larger scale factor.
/// Images: the four rotated corners. Malformed input yields [`Bounds::ZERO`].
pub fn calculate_bounds<'a>(object: impl Into<BoundsSource<'a>>) -> Bounds {
    match object.into() {
        BoundsSource::Stroke(stroke) => {
            let affine = stroke.transform();
            let Some(rect) = points_rect(stroke.local_points().map(|p| affine * p)) else {
                return Bounds::ZERO;
            };
            let scale = stroke.scale_x.abs().max(stroke.scale_y.abs());
            let pad = (stroke.stroke_width * scale / 2.0).max(0.0);
            if !pad.is_finite() {
                return Bounds::ZERO;
            }
            Bounds::from_rect(rect.inflate(pad, pad))
        }
        BoundsSource::Image(image) => {
            points_rect(image.corners().into_iter()).map_or(Bounds::ZERO, Bounds::from_rect)
        }
    }
}

fn points_rect(points: impl Iterator<Item = Point>) -> Option<Rect> {
    let mut min_x = f64::MAX;
    let mut min_y = f64::MAX;
    let mut max_x = f64::MIN;
    let mut max_y = f64::MIN;
    let mut any = false;

    for point in points {
        if !point.is_finite() {
            return None;
        }
        any = true;
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    any.then(|| Rect::new(min_x, min_y, max_x, max_y))
}
