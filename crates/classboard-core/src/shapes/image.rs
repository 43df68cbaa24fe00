//! Image object for pasted raster images.

use super::{ObjectId, new_object_id};
use base64::{Engine, engine::general_purpose::STANDARD};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// Image format of pasted image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// PNG format.
    Png,
    /// JPEG format.
    Jpeg,
    /// WebP format.
    WebP,
    /// GIF format.
    Gif,
}

impl ImageFormat {
    /// Get MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Gif => "image/gif",
        }
    }

    /// Detect format from a MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.to_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/webp" => Some(ImageFormat::WebP),
            "image/gif" => Some(ImageFormat::Gif),
            _ => None,
        }
    }

    /// Detect format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }

        // PNG: 89 50 4E 47
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Some(ImageFormat::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ImageFormat::Jpeg);
        }

        // GIF: "GIF8"
        if data.starts_with(b"GIF8") {
            return Some(ImageFormat::Gif);
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }

        None
    }
}

/// An image placed on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: ObjectId,
    /// Data URI or URL.
    pub src: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    /// Rotation in degrees around the top-left corner.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub locked: bool,
}

impl Image {
    /// Create an image from a source URI.
    pub fn new(src: impl Into<String>, position: Point, width: f64, height: f64) -> Self {
        Self {
            id: new_object_id(),
            src: src.into(),
            x: position.x,
            y: position.y,
            width,
            height,
            rotation: 0.0,
            locked: false,
        }
    }

    /// Create an image from pasted bytes, embedding them as a data URI.
    ///
    /// Returns `None` when the bytes are not a recognized image format.
    pub fn from_bytes(data: &[u8], position: Point, width: f64, height: f64) -> Option<Self> {
        let format = ImageFormat::from_magic_bytes(data)?;
        let src = format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(data));
        Some(Self::new(src, position, width, height))
    }

    /// Builder-style id override.
    pub fn with_id(mut self, id: impl Into<ObjectId>) -> Self {
        self.id = id.into();
        self
    }

    /// Scale the display size to fit within max dimensions, preserving aspect ratio.
    pub fn fit_within(mut self, max_width: f64, max_height: f64) -> Self {
        if self.width <= 0.0 || self.height <= 0.0 {
            return self;
        }
        let aspect = self.width / self.height;
        let target_aspect = max_width / max_height;

        if aspect > target_aspect {
            self.width = max_width;
            self.height = max_width / aspect;
        } else {
            self.height = max_height;
            self.width = max_height * aspect;
        }

        self
    }

    /// Format of an embedded data URI, if any.
    pub fn format(&self) -> Option<ImageFormat> {
        let rest = self.src.strip_prefix("data:")?;
        let mime = rest.split(';').next()?;
        ImageFormat::from_mime_type(mime)
    }

    /// Raw bytes of an embedded base64 data URI.
    pub fn data(&self) -> Option<Vec<u8>> {
        let (_, payload) = self.src.strip_prefix("data:")?.split_once(";base64,")?;
        STANDARD.decode(payload).ok()
    }

    /// Unrotated rectangle.
    pub fn as_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Local-to-board transform: translate, then rotate around the origin corner.
    pub fn transform(&self) -> Affine {
        Affine::translate((self.x, self.y)) * Affine::rotate(self.rotation.to_radians())
    }

    /// The four corners on the board, clockwise from the origin corner.
    pub fn corners(&self) -> [Point; 4] {
        let affine = self.transform();
        [
            affine * Point::new(0.0, 0.0),
            affine * Point::new(self.width, 0.0),
            affine * Point::new(self.width, self.height),
            affine * Point::new(0.0, self.height),
        ]
    }

    /// Merge a partial update into this image.
    pub fn apply_patch(&mut self, patch: &ImagePatch) {
        if let Some(src) = &patch.src {
            self.src = src.clone();
        }
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(rotation) = patch.rotation {
            self.rotation = rotation;
        }
        if let Some(locked) = patch.locked {
            self.locked = locked;
        }
    }
}

/// Sparse update for an image. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl ImagePatch {
    /// Patch that moves an image.
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    /// Patch that resizes an image.
    pub fn size(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
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

    /// Patch that sets the lock flag.
    pub fn locked(locked: bool) -> Self {
        Self {
            locked: Some(locked),
            ..Self::default()
        }
    }
}
