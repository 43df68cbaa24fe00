//! Pure reducer from (board, operation) to the next board.
//!
//! Lenient by construction: updates for unknown ids are a benign race (an
//! object erased by someone else moments earlier) and are logged and skipped.

use crate::board::BoardState;
use crate::operation::{Operation, Payload};

/// Apply one operation to a board snapshot, producing the next snapshot.
///
/// Undo and redo need the history stack and are returned unchanged; see
/// [`crate::replay`] and [`crate::session`].
pub fn apply_operation(state: &BoardState, operation: &Operation) -> BoardState {
    let mut next = state.clone();

    match &operation.payload {
        Payload::Draw { line } => {
            if line.is_empty() {
                log::warn!("Skipping draw of stroke {} without points", line.id);
            } else {
                next.upsert_line(line.clone());
            }
        }
        Payload::Erase { line_ids } => {
            let removed = next.remove_lines(line_ids);
            if removed < line_ids.len() {
                log::debug!("Erase: {} of {} strokes were already gone", line_ids.len() - removed, line_ids.len());
            }
        }
        Payload::AddImage { image } => {
            next.upsert_image(image.clone());
        }
        Payload::UpdateImage { id, changes } => match next.image_mut(id) {
            Some(image) => image.apply_patch(changes),
            None => log::warn!("Ignoring update for unknown image {}", id),
        },
        Payload::UpdateLine { id, changes } => match next.line_mut(id) {
            Some(line) => line.apply_patch(changes),
            None => log::warn!("Ignoring update for unknown stroke {}", id),
        },
        Payload::DeleteObjects { line_ids, image_ids } => {
            next.remove_lines(line_ids);
            next.remove_images(image_ids);
        }
        Payload::Undo | Payload::Redo => {
            log::debug!("{} is a history marker; board unchanged", operation.kind());
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::*;
    use crate::shapes::{Image, ImagePatch, Stroke, StrokePatch};
    use kurbo::Point;

    fn stroke(id: &str) -> Stroke {
        Stroke::from_points(vec![0.0, 0.0, 5.0, 5.0]).with_id(id)
    }

    fn image(id: &str) -> Image {
        Image::new("data:image/png;base64,AA==", Point::new(1.0, 2.0), 30.0, 20.0).with_id(id)
    }

    #[test]
    fn test_draw_appends() {
        let state = BoardState::new();
        let next = apply_operation(&state, &serialize_draw_operation(&stroke("a"), "u"));
        assert_eq!(next.line_ids(), vec!["a".to_string()]);
        assert!(state.is_empty(), "input snapshot must not change");
    }

    #[test]
    fn test_draw_is_idempotent() {
        let mut state = BoardState::new();
        let op = serialize_draw_operation(&stroke("a"), "u");
        state = apply_operation(&state, &op);
        state = apply_operation(&state, &op);
        assert_eq!(state.lines.len(), 1);
    }

    #[test]
    fn test_draw_replaces_existing_id() {
        let mut state = apply_operation(&BoardState::new(), &serialize_draw_operation(&stroke("a"), "u"));
        let mut recolored = stroke("a");
        recolored.stroke = "#123456".to_string();
        state = apply_operation(&state, &serialize_draw_operation(&recolored, "v"));
        assert_eq!(state.lines.len(), 1);
        assert_eq!(state.lines[0].stroke, "#123456");
    }

    #[test]
    fn test_draw_without_points_is_skipped() {
        let empty = Stroke::from_points(vec![]).with_id("e");
        let next = apply_operation(&BoardState::new(), &serialize_draw_operation(&empty, "u"));
        assert!(next.is_empty());
    }

    #[test]
    fn test_erase_removes_listed_ids() {
        let mut state = BoardState::new();
        for id in ["a", "b", "c"] {
            state = apply_operation(&state, &serialize_draw_operation(&stroke(id), "u"));
        }
        let next = apply_operation(&state, &serialize_erase_operation(vec!["a".into(), "c".into(), "zzz".into()], "u"));
        assert_eq!(next.line_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_add_image_is_idempotent() {
        let op = serialize_add_image_operation(&image("i"), "u");
        let state = apply_operation(&BoardState::new(), &op);
        let state = apply_operation(&state, &op);
        assert_eq!(state.images.len(), 1);
    }

    #[test]
    fn test_update_image_merges_patch() {
        let state = apply_operation(&BoardState::new(), &serialize_add_image_operation(&image("i"), "u"));
        let next = apply_operation(&state, &serialize_update_image_operation("i", ImagePatch::position(50.0, 60.0), "u"));
        let img = next.image("i").unwrap();
        assert!((img.x - 50.0).abs() < f64::EPSILON);
        assert!((img.y - 60.0).abs() < f64::EPSILON);
        assert!((img.width - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_line_merges_patch() {
        let state = apply_operation(&BoardState::new(), &serialize_draw_operation(&stroke("a"), "u"));
        let next = apply_operation(&state, &serialize_update_line_operation("a", StrokePatch::rotation(30.0), "u"));
        assert!((next.line("a").unwrap().rotation - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let state = apply_operation(&BoardState::new(), &serialize_draw_operation(&stroke("a"), "u"));
        let next = apply_operation(&state, &serialize_update_line_operation("ghost", StrokePatch::position(1.0, 1.0), "u"));
        assert_eq!(next, state);
        let next = apply_operation(&state, &serialize_update_image_operation("ghost", ImagePatch::locked(true), "u"));
        assert_eq!(next, state);
    }

    #[test]
    fn test_delete_objects_removes_both_kinds() {
        let mut state = apply_operation(&BoardState::new(), &serialize_draw_operation(&stroke("a"), "u"));
        state = apply_operation(&state, &serialize_draw_operation(&stroke("b"), "u"));
        state = apply_operation(&state, &serialize_add_image_operation(&image("i"), "u"));

        let next = apply_operation(
            &state,
            &serialize_delete_objects_operation(vec!["a".into()], vec!["i".into()], "u"),
        );
        assert_eq!(next.line_ids(), vec!["b".to_string()]);
        assert!(next.images.is_empty());
    }

    #[test]
    fn test_history_markers_leave_board_unchanged() {
        let state = apply_operation(&BoardState::new(), &serialize_draw_operation(&stroke("a"), "u"));
        assert_eq!(apply_operation(&state, &serialize_undo_operation("u")), state);
        assert_eq!(apply_operation(&state, &serialize_redo_operation("u")), state);
    }
}
