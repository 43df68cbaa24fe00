//! Board document state: strokes, images and the local selection.

use crate::shapes::{Image, ObjectId, Stroke};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ids of the currently selected objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default)]
    pub line_ids: Vec<ObjectId>,
    #[serde(default)]
    pub image_ids: Vec<ObjectId>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.line_ids.is_empty() && self.image_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.line_ids.iter().any(|l| l == id) || self.image_ids.iter().any(|i| i == id)
    }

    pub fn clear(&mut self) {
        self.line_ids.clear();
        self.image_ids.clear();
    }

    /// Drop ids that no longer refer to anything on the board.
    fn retain_existing(&mut self, lines: &[Stroke], images: &[Image]) {
        self.line_ids.retain(|id| lines.iter().any(|l| &l.id == id));
        self.image_ids.retain(|id| images.iter().any(|i| &i.id == id));
    }
}

/// Full document state at one point in time.
///
/// Vector order is draw order (back to front).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    #[serde(default)]
    pub lines: Vec<Stroke>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub selection: Selection,
}

impl BoardState {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the board has no objects.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.images.is_empty()
    }

    /// Number of objects on the board.
    pub fn len(&self) -> usize {
        self.lines.len() + self.images.len()
    }

    pub fn line(&self, id: &str) -> Option<&Stroke> {
        self.lines.iter().find(|l| l.id == id)
    }

    pub fn line_mut(&mut self, id: &str) -> Option<&mut Stroke> {
        self.lines.iter_mut().find(|l| l.id == id)
    }

    pub fn image(&self, id: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.id == id)
    }

    pub fn image_mut(&mut self, id: &str) -> Option<&mut Image> {
        self.images.iter_mut().find(|i| i.id == id)
    }

    /// Ids of all strokes, in draw order.
    pub fn line_ids(&self) -> Vec<ObjectId> {
        self.lines.iter().map(|l| l.id.clone()).collect()
    }

    /// Insert a stroke, replacing an existing one with the same id in place.
    pub fn upsert_line(&mut self, stroke: Stroke) {
        match self.line_mut(&stroke.id) {
            Some(existing) => *existing = stroke,
            None => self.lines.push(stroke),
        }
    }

    /// Insert an image, replacing an existing one with the same id in place.
    pub fn upsert_image(&mut self, image: Image) {
        match self.image_mut(&image.id) {
            Some(existing) => *existing = image,
            None => self.images.push(image),
        }
    }

    /// Remove the given strokes. Returns how many were removed.
    pub fn remove_lines(&mut self, ids: &[ObjectId]) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| !ids.contains(&l.id));
        self.selection.line_ids.retain(|id| !ids.contains(id));
        before - self.lines.len()
    }

    /// Remove the given images. Returns how many were removed.
    pub fn remove_images(&mut self, ids: &[ObjectId]) -> usize {
        let before = self.images.len();
        self.images.retain(|i| !ids.contains(&i.id));
        self.selection.image_ids.retain(|id| !ids.contains(id));
        before - self.images.len()
    }

    /// Replace the selection with the ids that exist on the board.
    pub fn select(&mut self, ids: &[ObjectId]) {
        self.selection.line_ids = ids
            .iter()
            .filter(|id| self.line(id).is_some())
            .cloned()
            .collect();
        self.selection.image_ids = ids
            .iter()
            .filter(|id| self.image(id).is_some())
            .cloned()
            .collect();
    }

    /// Every object id appears once, across strokes and images.
    pub fn has_unique_ids(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.len());
        self.lines
            .iter()
            .map(|l| l.id.as_str())
            .chain(self.images.iter().map(|i| i.id.as_str()))
            .all(|id| seen.insert(id))
    }

    /// Same lines and images, ignoring selection.
    pub fn same_content(&self, other: &BoardState) -> bool {
        self.lines == other.lines && self.images == other.images
    }

    /// Merge two datasets with id-based de-duplication.
    ///
    /// The dataset holding more objects is the primary one: its objects win
    /// on id conflicts and its order comes first, followed by objects only
    /// the other dataset knows about, in their original order. Ties prefer
    /// `self`. The selection of `self` is kept.
    pub fn merge(&self, other: &BoardState) -> BoardState {
        let (primary, secondary) = if other.len() > self.len() {
            (other, self)
        } else {
            (self, other)
        };

        let line_ids: HashSet<&str> = primary.lines.iter().map(|l| l.id.as_str()).collect();
        let image_ids: HashSet<&str> = primary.images.iter().map(|i| i.id.as_str()).collect();

        let mut merged = BoardState {
            lines: primary.lines.clone(),
            images: primary.images.clone(),
            selection: self.selection.clone(),
        };
        merged.lines.extend(
            secondary
                .lines
                .iter()
                .filter(|l| !line_ids.contains(l.id.as_str()))
                .cloned(),
        );
        merged.images.extend(
            secondary
                .images
                .iter()
                .filter(|i| !image_ids.contains(i.id.as_str()))
                .cloned(),
        );
        merged.selection.retain_existing(&merged.lines, &merged.images);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    fn line(id: &str) -> Stroke {
        Stroke::from_points(vec![0.0, 0.0, 1.0, 1.0]).with_id(id)
    }

    fn image(id: &str) -> Image {
        Image::new("x", Point::ZERO, 10.0, 10.0).with_id(id)
    }

    #[test]
    fn test_board_creation() {
        let board = BoardState::new();
        assert!(board.is_empty());
        assert_eq!(board.len(), 0);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut board = BoardState::new();
        board.upsert_line(line("a"));
        board.upsert_line(line("b"));

        let mut replacement = line("a");
        replacement.stroke = "#ff0000".to_string();
        board.upsert_line(replacement);

        assert_eq!(board.lines.len(), 2);
        assert_eq!(board.lines[0].id, "a");
        assert_eq!(board.lines[0].stroke, "#ff0000");
    }

    #[test]
    fn test_remove_drops_selection() {
        let mut board = BoardState::new();
        board.upsert_line(line("a"));
        board.upsert_image(image("i"));
        board.select(&["a".to_string(), "i".to_string(), "ghost".to_string()]);
        assert_eq!(board.selection.line_ids, vec!["a".to_string()]);
        assert_eq!(board.selection.image_ids, vec!["i".to_string()]);

        assert_eq!(board.remove_lines(&["a".to_string()]), 1);
        assert_eq!(board.remove_images(&["i".to_string()]), 1);
        assert!(board.selection.is_empty());
    }

    #[test]
    fn test_merge_prefers_more_complete_dataset() {
        let mut local = BoardState::new();
        local.upsert_line(line("a"));

        let mut persisted = BoardState::new();
        let mut remote_a = line("a");
        remote_a.stroke = "#00ff00".to_string();
        persisted.upsert_line(remote_a);
        persisted.upsert_line(line("b"));
        persisted.upsert_image(image("i"));

        let merged = local.merge(&persisted);
        assert_eq!(merged.line_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.lines[0].stroke, "#00ff00");
        assert_eq!(merged.images.len(), 1);
    }

    #[test]
    fn test_merge_keeps_local_only_objects() {
        let mut local = BoardState::new();
        local.upsert_line(line("mine"));

        let mut persisted = BoardState::new();
        persisted.upsert_line(line("a"));
        persisted.upsert_line(line("b"));

        let merged = local.merge(&persisted);
        assert_eq!(
            merged.line_ids(),
            vec!["a".to_string(), "b".to_string(), "mine".to_string()]
        );
    }

    #[test]
    fn test_merge_is_deduplicated() {
        let mut board = BoardState::new();
        board.upsert_line(line("a"));
        board.upsert_image(image("i"));
        let merged = board.merge(&board.clone());
        assert_eq!(merged.len(), 2);
        assert!(merged.same_content(&board));
    }
}
