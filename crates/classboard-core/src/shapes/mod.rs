//! Board objects: freehand strokes and pasted images.

mod image;
mod stroke;

pub use image::{Image, ImageFormat, ImagePatch};
pub use stroke::{Stroke, StrokePatch, StrokeTool};

use uuid::Uuid;

/// Unique identifier for a board object.
///
/// Ids are strings on the wire; locally created objects use UUID v4 text.
pub type ObjectId = String;

/// Generate a fresh object id.
pub fn new_object_id() -> ObjectId {
    Uuid::new_v4().to_string()
}

fn default_scale() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}
