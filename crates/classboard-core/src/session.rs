//! Board session: the single place where board mutations happen.
//!
//! Local gestures and remote operations share one commit path: apply the
//! operation, push a history snapshot, then publish. Remote operations are
//! applied inside a [`RemoteScope`], which makes the publish step a no-op so
//! nothing received from the relay is ever sent back.

use crate::apply::apply_operation;
use crate::board::{BoardState, Selection};
use crate::config::SessionConfig;
use crate::history::History;
use crate::operation::{
    Bounds, Operation, Payload, serialize_add_image_operation, serialize_delete_objects_operation,
    serialize_draw_operation, serialize_erase_operation, serialize_redo_operation, serialize_undo_operation,
    serialize_update_image_operation, serialize_update_line_operation,
};
use crate::replay::{derive_activity, replay_rows};
use crate::shapes::{Image, ImagePatch, ObjectId, Stroke, StrokePatch, StrokeTool};
use crate::store::{LocalStore, StateProvider};
use crate::sync::{ConnectionStatus, NativeSocket, OperationRow, SyncTransport, Transport, TransportEvent};
use kurbo::Point;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

/// Erase gesture in progress.
#[derive(Debug, Clone)]
struct EraseGesture {
    /// Stroke ids when the gesture began.
    initial_ids: Vec<ObjectId>,
    /// Working copy with hit strokes removed.
    remaining: Vec<Stroke>,
}

/// A collaborative board bound to one state provider and one transport.
pub struct BoardSession<P: StateProvider = LocalStore, T: Transport = SyncTransport<NativeSocket>> {
    sender_id: String,
    store: P,
    transport: T,
    /// Set while a remote operation is being applied.
    applying_remote: bool,
    drawing: Option<Stroke>,
    erasing: Option<EraseGesture>,
}

/// Marks the session as applying a remote operation until dropped.
struct RemoteScope<'a, P: StateProvider, T: Transport> {
    session: &'a mut BoardSession<P, T>,
}

impl<P: StateProvider, T: Transport> Deref for RemoteScope<'_, P, T> {
    type Target = BoardSession<P, T>;

    fn deref(&self) -> &Self::Target {
        self.session
    }
}

impl<P: StateProvider, T: Transport> DerefMut for RemoteScope<'_, P, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}

impl<P: StateProvider, T: Transport> Drop for RemoteScope<'_, P, T> {
    fn drop(&mut self) {
        self.session.applying_remote = false;
    }
}

impl BoardSession {
    /// Connect to the relay described by `config` and request the board's log.
    pub fn connect(config: SessionConfig) -> Self {
        let store = LocalStore::new(config.history_cap);
        let sender_id = config.sender_id.clone();
        let mut transport = SyncTransport::connect(config, NativeSocket::new());
        transport.request_history();
        Self::new(sender_id, store, transport)
    }
}

impl<P: StateProvider, T: Transport> BoardSession<P, T> {
    pub fn new(sender_id: impl Into<String>, store: P, transport: T) -> Self {
        Self {
            sender_id: sender_id.into(),
            store,
            transport,
            applying_remote: false,
            drawing: None,
            erasing: None,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Board as the user sees it (without in-progress gestures).
    pub fn board(&self) -> &BoardState {
        self.store.board()
    }

    pub fn history(&self) -> &History {
        self.store.history()
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Drives the "connected" badge.
    pub fn is_connected(&self) -> bool {
        self.transport.status().is_connected()
    }

    pub fn is_applying_remote(&self) -> bool {
        self.applying_remote
    }

    pub fn can_undo(&self) -> bool {
        self.store.history().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.store.history().can_redo()
    }

    /// Stroke being drawn, for preview rendering.
    pub fn drawing_preview(&self) -> Option<&Stroke> {
        self.drawing.as_ref()
    }

    /// Strokes left by the erase gesture in progress.
    pub fn erasing_preview(&self) -> Option<&[Stroke]> {
        self.erasing.as_ref().map(|g| g.remaining.as_slice())
    }

    // --- Drawing ---

    /// Begin a stroke at `point`. The stroke stays out of history until stopped.
    pub fn start_drawing(&mut self, tool: StrokeTool, color: impl Into<String>, width: f64, point: Point) {
        let mut stroke = Stroke::new(tool, color, width);
        stroke.add_point(point);
        self.drawing = Some(stroke);
    }

    pub fn continue_drawing(&mut self, point: Point) {
        if let Some(stroke) = self.drawing.as_mut() {
            stroke.add_point(point);
        }
    }

    /// Finish the stroke and commit it. Returns the new stroke id.
    ///
    /// Eraser-marker strokes are deletion intents and never land on the board.
    pub fn stop_drawing(&mut self) -> Option<ObjectId> {
        let stroke = self.drawing.take()?;
        if !stroke.tool.is_visible() || stroke.is_empty() {
            return None;
        }
        let id = stroke.id.clone();
        let operation = serialize_draw_operation(&stroke, &self.sender_id);
        self.commit(operation);
        Some(id)
    }

    // --- Erasing ---

    pub fn start_erasing(&mut self) {
        let board = self.store.board();
        self.erasing = Some(EraseGesture {
            initial_ids: board.line_ids(),
            remaining: board.lines.clone(),
        });
    }

    /// Remove strokes hit by the eraser from the working copy.
    pub fn continue_erasing(&mut self, hit_ids: &[ObjectId]) {
        if let Some(gesture) = self.erasing.as_mut() {
            gesture.remaining.retain(|line| !hit_ids.contains(&line.id));
        }
    }

    /// Diff the working copy against the ids at gesture start and commit one
    /// erase. Returns the erased ids (empty when nothing was hit).
    pub fn stop_erasing(&mut self) -> Vec<ObjectId> {
        let Some(gesture) = self.erasing.take() else {
            return Vec::new();
        };
        let erased: Vec<ObjectId> = gesture
            .initial_ids
            .into_iter()
            .filter(|id| !gesture.remaining.iter().any(|line| &line.id == id))
            .collect();
        if erased.is_empty() {
            return erased;
        }
        let operation = serialize_erase_operation(erased.clone(), &self.sender_id);
        self.commit(operation);
        erased
    }

    // --- Images ---

    /// Add an image from pasted bytes. None when the format is not recognized.
    pub fn paste_image(&mut self, bytes: &[u8], position: Point, width: f64, height: f64) -> Option<ObjectId> {
        match Image::from_bytes(bytes, position, width, height) {
            Some(image) => Some(self.add_image(image)),
            None => {
                log::warn!("Ignoring paste of {} bytes: unknown image format", bytes.len());
                None
            }
        }
    }

    pub fn add_image(&mut self, image: Image) -> ObjectId {
        let id = image.id.clone();
        let operation = serialize_add_image_operation(&image, &self.sender_id);
        self.commit(operation);
        id
    }

    /// Flip an image's lock. Returns the new lock state.
    pub fn toggle_lock(&mut self, image_id: &str) -> Option<bool> {
        let locked = !self.store.board().image(image_id)?.locked;
        let operation = serialize_update_image_operation(image_id, ImagePatch::locked(locked), &self.sender_id);
        self.commit(operation);
        Some(locked)
    }

    // --- Transforms ---

    /// Move a stroke or image to `position`. Locked images don't move.
    pub fn move_object(&mut self, id: &str, position: Point) -> bool {
        self.transform_object(
            id,
            |_| StrokePatch::position(position.x, position.y),
            |_| ImagePatch::position(position.x, position.y),
        )
    }

    /// Resize to `width` x `height` in board units.
    ///
    /// Strokes are resized through their scale, relative to the unscaled
    /// extent of their points.
    pub fn resize_object(&mut self, id: &str, width: f64, height: f64) -> bool {
        self.transform_object(
            id,
            |line| {
                let (sx, sy) = scale_for_size(line, width, height);
                StrokePatch::scale(sx, sy)
            },
            |_| ImagePatch::size(width, height),
        )
    }

    /// Set absolute rotation in degrees.
    pub fn rotate_object(&mut self, id: &str, degrees: f64) -> bool {
        self.transform_object(id, |_| StrokePatch::rotation(degrees), |_| ImagePatch::rotation(degrees))
    }

    fn transform_object(
        &mut self,
        id: &str,
        line_patch: impl FnOnce(&Stroke) -> StrokePatch,
        image_patch: impl FnOnce(&Image) -> ImagePatch,
    ) -> bool {
        let board = self.store.board();
        let operation = if let Some(line) = board.line(id) {
            serialize_update_line_operation(id, line_patch(line), &self.sender_id)
        } else if let Some(image) = board.image(id) {
            if image.locked {
                log::debug!("Image {} is locked", id);
                return false;
            }
            serialize_update_image_operation(id, image_patch(image), &self.sender_id)
        } else {
            log::warn!("Transform of unknown object {}", id);
            return false;
        };
        self.commit(operation);
        true
    }

    // --- Selection (local only) ---

    pub fn select(&mut self, ids: &[ObjectId]) {
        let mut board = self.store.board().clone();
        board.select(ids);
        self.store.set_selection(board.selection);
    }

    pub fn clear_selection(&mut self) {
        self.store.set_selection(Selection::default());
    }

    /// Delete every selected stroke and image.
    pub fn delete_selection(&mut self) -> bool {
        let selection = self.store.board().selection.clone();
        if selection.is_empty() {
            return false;
        }
        let operation = serialize_delete_objects_operation(selection.line_ids, selection.image_ids, &self.sender_id);
        self.commit(operation);
        true
    }

    // --- History ---

    /// Step back and broadcast an undo marker.
    pub fn undo(&mut self) -> bool {
        if !self.store.undo() {
            return false;
        }
        self.publish(&serialize_undo_operation(&self.sender_id));
        true
    }

    /// Step forward and broadcast a redo marker.
    pub fn redo(&mut self) -> bool {
        if !self.store.redo() {
            return false;
        }
        self.publish(&serialize_redo_operation(&self.sender_id));
        true
    }

    /// Bounds of the most recent visible change, for "jump to last activity".
    pub fn jump_to_last_activity(&self) -> Option<Bounds> {
        self.store.history().last_activity().map(|activity| activity.bounds)
    }

    // --- Remote ---

    /// Apply one operation received from the relay without re-sending it.
    pub fn handle_remote(&mut self, operation: Operation) {
        let mut scope = self.enter_remote();
        match operation.payload {
            Payload::Undo => {
                scope.store.undo();
            }
            Payload::Redo => {
                scope.store.redo();
            }
            _ => scope.commit(operation),
        }
    }

    /// Rebuild board and history from persisted rows.
    ///
    /// Local objects no snapshot of the log ever held are merged in as one
    /// extra snapshot; objects the log erased stay erased. When the replayed
    /// state fails verification the current (last known-good) state is kept
    /// and false is returned.
    pub fn load_history(&mut self, rows: &[OperationRow]) -> bool {
        let outcome = replay_rows(rows, BoardState::new());
        if !outcome.verify() {
            log::error!("Replay of {} rows failed verification; keeping last known-good board", rows.len());
            return false;
        }

        let local = self.store.board().clone();
        let mut history = outcome.history;
        let unsynced = unsynced_objects(&local, &history);
        if !unsynced.is_empty() {
            log::info!("Keeping {} local objects missing from the log", unsynced.len());
            let merged = history.board().merge(&unsynced);
            history.push(merged, None);
        }

        let mut board = history.board().clone();
        let selected: Vec<ObjectId> = local
            .selection
            .line_ids
            .iter()
            .chain(local.selection.image_ids.iter())
            .cloned()
            .collect();
        board.select(&selected);
        history.replace_current(board);

        log::info!("Loaded {} rows, history index {}", rows.len(), history.index());
        self.store.restore(history);
        true
    }

    /// Poll the transport and apply what arrived. Returns the number of
    /// remote operations applied.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut applied = 0;
        for event in self.transport.poll(now) {
            match event {
                TransportEvent::Operation(operation) => {
                    self.handle_remote(operation);
                    applied += 1;
                }
                TransportEvent::History(rows) => {
                    self.load_history(&rows);
                }
                TransportEvent::StatusChanged(status) => {
                    log::debug!("Connection status: {:?}", status);
                }
            }
        }
        applied
    }

    fn enter_remote(&mut self) -> RemoteScope<'_, P, T> {
        self.applying_remote = true;
        RemoteScope { session: self }
    }

    /// Apply, snapshot, publish.
    fn commit(&mut self, operation: Operation) {
        let before = self.store.board();
        let after = apply_operation(before, &operation);
        let activity = derive_activity(&operation, before, &after);
        self.store.commit(after, activity);
        self.publish(&operation);
    }

    fn publish(&mut self, operation: &Operation) {
        if self.applying_remote {
            log::trace!("Not echoing remote {}", operation.kind());
            return;
        }
        if self.transport.is_receive_only() {
            return;
        }
        self.transport.send(operation);
    }
}

/// Objects of `local` that no snapshot in `history` ever held.
fn unsynced_objects(local: &BoardState, history: &History) -> BoardState {
    let known: HashSet<&str> = history
        .entries()
        .iter()
        .flat_map(|entry| {
            let lines = entry.board.lines.iter().map(|l| l.id.as_str());
            lines.chain(entry.board.images.iter().map(|i| i.id.as_str()))
        })
        .collect();
    BoardState {
        lines: local
            .lines
            .iter()
            .filter(|l| !known.contains(l.id.as_str()))
            .cloned()
            .collect(),
        images: local
            .images
            .iter()
            .filter(|i| !known.contains(i.id.as_str()))
            .cloned()
            .collect(),
        selection: Selection::default(),
    }
}

/// Scale factors that make a stroke's points span `width` x `height`.
fn scale_for_size(line: &Stroke, width: f64, height: f64) -> (f64, f64) {
    let mut min = Point::new(f64::MAX, f64::MAX);
    let mut max = Point::new(f64::MIN, f64::MIN);
    for p in line.local_points() {
        min = Point::new(min.x.min(p.x), min.y.min(p.y));
        max = Point::new(max.x.max(p.x), max.y.max(p.y));
    }
    let extent_x = max.x - min.x;
    let extent_y = max.y - min.y;
    let sx = if extent_x > 0.0 { width / extent_x } else { line.scale_x };
    let sy = if extent_y > 0.0 { height / extent_y } else { line.scale_y };
    (sx, sy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::replay::replay;
    use crate::sync::ServerMessage;
    use crate::sync::test_util::ScriptedSocket;

    /// Transport that records what the session sends.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<Operation>,
        inbound: Vec<TransportEvent>,
        receive_only: bool,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, operation: &Operation) -> Option<OperationRow> {
            if self.receive_only {
                return None;
            }
            self.sent.push(operation.clone());
            operation.to_row("board", "class").ok()
        }

        fn poll(&mut self, _now: Instant) -> Vec<TransportEvent> {
            std::mem::take(&mut self.inbound)
        }

        fn request_history(&mut self) {}

        fn status(&self) -> ConnectionStatus {
            ConnectionStatus::Subscribed
        }

        fn is_receive_only(&self) -> bool {
            self.receive_only
        }
    }

    type TestSession = BoardSession<LocalStore, RecordingTransport>;

    fn session() -> TestSession {
        BoardSession::new("me", LocalStore::new(None), RecordingTransport::default())
    }

    fn sent_kinds(session: &TestSession) -> Vec<OperationKind> {
        session.transport().sent.iter().map(Operation::kind).collect()
    }

    fn draw_line(session: &mut TestSession, from: Point, to: Point) -> ObjectId {
        session.start_drawing(StrokeTool::Pencil, "#ff0000", 3.0, from);
        session.continue_drawing(to);
        session.stop_drawing().unwrap()
    }

    fn remote_draw(id: &str) -> Operation {
        serialize_draw_operation(&Stroke::from_points(vec![0.0, 0.0, 4.0, 4.0]).with_id(id), "them")
    }

    const PNG: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_drawing_commits_once() {
        let mut session = session();
        session.start_drawing(StrokeTool::Pencil, "#000", 2.0, Point::new(0.0, 0.0));
        session.continue_drawing(Point::new(5.0, 5.0));
        session.continue_drawing(Point::new(10.0, 0.0));
        assert!(session.board().is_empty());
        assert_eq!(session.drawing_preview().map(Stroke::len), Some(3));

        let id = session.stop_drawing().unwrap();
        assert_eq!(session.board().line_ids(), vec![id]);
        assert_eq!(session.history().len(), 2);
        assert_eq!(sent_kinds(&session), vec![OperationKind::Draw]);
        assert!(session.drawing_preview().is_none());
    }

    #[test]
    fn test_eraser_marker_stroke_is_not_committed() {
        let mut session = session();
        session.start_drawing(StrokeTool::EraserMarker, "#fff", 20.0, Point::ZERO);
        session.continue_drawing(Point::new(10.0, 10.0));
        assert!(session.stop_drawing().is_none());
        assert!(session.board().is_empty());
        assert!(session.transport().sent.is_empty());
    }

    #[test]
    fn test_erase_gesture_diffs_ids() {
        let mut session = session();
        let a = draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        let b = draw_line(&mut session, Point::ZERO, Point::new(2.0, 2.0));
        let c = draw_line(&mut session, Point::ZERO, Point::new(3.0, 3.0));

        session.start_erasing();
        session.continue_erasing(&[c.clone()]);
        session.continue_erasing(&[a.clone(), "unknown".to_string()]);
        assert_eq!(session.erasing_preview().map(<[Stroke]>::len), Some(1));
        assert_eq!(session.board().lines.len(), 3);

        let erased = session.stop_erasing();
        assert_eq!(erased, vec![a.clone(), c.clone()]);
        assert_eq!(session.board().line_ids(), vec![b]);
        assert_eq!(session.history().len(), 5);

        match &session.transport().sent.last().unwrap().payload {
            Payload::Erase { line_ids } => assert_eq!(line_ids, &vec![a, c]),
            other => panic!("expected erase, got {:?}", other),
        }
    }

    #[test]
    fn test_erase_without_hits_commits_nothing() {
        let mut session = session();
        draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        session.start_erasing();
        assert!(session.stop_erasing().is_empty());
        assert_eq!(session.history().len(), 2);
        assert_eq!(sent_kinds(&session), vec![OperationKind::Draw]);
    }

    #[test]
    fn test_remote_operation_is_not_echoed() {
        let mut session = session();
        session.handle_remote(remote_draw("r1"));

        assert_eq!(session.board().line_ids(), vec!["r1".to_string()]);
        assert_eq!(session.history().len(), 2);
        assert!(session.transport().sent.is_empty());
        assert!(!session.is_applying_remote());

        draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        assert_eq!(sent_kinds(&session), vec![OperationKind::Draw]);
    }

    #[test]
    fn test_remote_undo_redo_move_index_without_sending() {
        let mut session = session();
        session.handle_remote(remote_draw("r1"));
        session.handle_remote(serialize_undo_operation("them"));
        assert!(session.board().is_empty());
        session.handle_remote(serialize_redo_operation("them"));
        assert_eq!(session.board().lines.len(), 1);
        assert!(session.transport().sent.is_empty());
    }

    #[test]
    fn test_local_undo_redo_send_markers() {
        let mut session = session();
        assert!(!session.undo());
        draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        assert!(session.undo());
        assert!(session.board().is_empty());
        assert!(session.redo());
        assert!(!session.redo());
        assert_eq!(
            sent_kinds(&session),
            vec![OperationKind::Draw, OperationKind::Undo, OperationKind::Redo]
        );
    }

    #[test]
    fn test_incremental_matches_replay_of_sent_log() {
        let mut session = session();
        let a = draw_line(&mut session, Point::ZERO, Point::new(10.0, 10.0));
        let b = draw_line(&mut session, Point::new(20.0, 0.0), Point::new(30.0, 10.0));
        let image = session.paste_image(&PNG, Point::new(50.0, 50.0), 40.0, 30.0).unwrap();
        session.move_object(&b, Point::new(5.0, 5.0));
        session.rotate_object(&image, 45.0);
        session.undo();
        session.resize_object(&a, 20.0, 20.0);
        session.start_erasing();
        session.continue_erasing(&[b.clone()]);
        session.stop_erasing();
        session.undo();
        session.redo();
        session.select(&[image.clone()]);
        session.delete_selection();

        let outcome = replay(&session.transport().sent, BoardState::new());
        assert!(outcome.state.same_content(session.board()));
        assert_eq!(outcome.final_index(), session.history().index());
        assert_eq!(outcome.history.len(), session.history().len());
    }

    #[test]
    fn test_receive_only_applies_locally_without_sending() {
        let transport = RecordingTransport {
            receive_only: true,
            ..Default::default()
        };
        let mut session = BoardSession::new("me", LocalStore::new(None), transport);
        draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        session.undo();
        assert!(session.transport().sent.is_empty());
        assert!(session.can_redo());
    }

    #[test]
    fn test_locked_image_resists_transforms() {
        let mut session = session();
        let id = session.paste_image(&PNG, Point::ZERO, 10.0, 10.0).unwrap();
        assert_eq!(session.toggle_lock(&id), Some(true));
        assert!(!session.move_object(&id, Point::new(9.0, 9.0)));
        assert!(!session.rotate_object(&id, 90.0));
        assert!((session.board().image(&id).unwrap().x).abs() < f64::EPSILON);

        assert_eq!(session.toggle_lock(&id), Some(false));
        assert!(session.move_object(&id, Point::new(9.0, 9.0)));
        assert_eq!(
            sent_kinds(&session),
            vec![
                OperationKind::AddImage,
                OperationKind::UpdateImage,
                OperationKind::UpdateImage,
                OperationKind::UpdateImage,
            ]
        );
    }

    #[test]
    fn test_paste_rejects_unknown_bytes() {
        let mut session = session();
        assert!(session.paste_image(b"hello", Point::ZERO, 1.0, 1.0).is_none());
        assert!(session.board().is_empty());
    }

    #[test]
    fn test_resize_stroke_uses_scale() {
        let mut session = session();
        let id = draw_line(&mut session, Point::ZERO, Point::new(10.0, 5.0));
        assert!(session.resize_object(&id, 20.0, 20.0));
        let line = session.board().line(&id).unwrap();
        assert!((line.scale_x - 2.0).abs() < f64::EPSILON);
        assert!((line.scale_y - 4.0).abs() < f64::EPSILON);
        assert!(!session.resize_object("ghost", 1.0, 1.0));
    }

    #[test]
    fn test_selection_is_local_only() {
        let mut session = session();
        let id = draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        session.select(&[id.clone(), "ghost".to_string()]);
        assert_eq!(session.board().selection.line_ids, vec![id]);
        session.clear_selection();
        assert!(session.board().selection.is_empty());
        assert_eq!(session.history().len(), 2);
        assert_eq!(sent_kinds(&session), vec![OperationKind::Draw]);
        assert!(!session.delete_selection());
    }

    #[test]
    fn test_delete_selection_sends_both_lists() {
        let mut session = session();
        let line = draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        let image = session.paste_image(&PNG, Point::ZERO, 10.0, 10.0).unwrap();
        session.select(&[line.clone(), image.clone()]);
        assert!(session.delete_selection());
        assert!(session.board().is_empty());

        match &session.transport().sent.last().unwrap().payload {
            Payload::DeleteObjects { line_ids, image_ids } => {
                assert_eq!(line_ids, &vec![line]);
                assert_eq!(image_ids, &vec![image]);
            }
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[test]
    fn test_load_history_rebuilds_undo_stack() {
        let a = Stroke::from_points(vec![0.0, 0.0, 1.0, 1.0]).with_id("a");
        let b = Stroke::from_points(vec![0.0, 0.0, 2.0, 2.0]).with_id("b");
        let rows: Vec<OperationRow> = [
            serialize_draw_operation(&a, "them"),
            serialize_draw_operation(&b, "them"),
            serialize_undo_operation("them"),
        ]
        .iter()
        .map(|op| op.to_row("board", "class").unwrap())
        .collect();

        let mut session = session();
        assert!(session.load_history(&rows));
        assert_eq!(session.board().line_ids(), vec!["a".to_string()]);
        assert!(session.can_redo());
        assert!(session.redo());
        assert_eq!(session.board().lines.len(), 2);
    }

    #[test]
    fn test_load_history_keeps_unsynced_local_objects() {
        let mut session = session();
        let local = draw_line(&mut session, Point::ZERO, Point::new(1.0, 1.0));
        session.select(&[local.clone()]);

        let remote = Stroke::from_points(vec![5.0, 5.0, 6.0, 6.0]).with_id("remote");
        let rows = vec![serialize_draw_operation(&remote, "them").to_row("board", "class").unwrap()];
        assert!(session.load_history(&rows));

        assert_eq!(session.board().lines.len(), 2);
        assert!(session.board().line(&local).is_some());
        assert!(session.board().line("remote").is_some());
        assert!(session.board().selection.contains(&local));
        assert_eq!(session.history().len(), 3);
    }

    #[test]
    fn test_pump_applies_operations_and_history() {
        let mut session = session();
        let row = remote_draw("h1").to_row("board", "class").unwrap();
        session.transport_mut().inbound = vec![
            TransportEvent::StatusChanged(ConnectionStatus::Subscribed),
            TransportEvent::History(vec![row]),
            TransportEvent::Operation(remote_draw("live")),
        ];

        assert_eq!(session.pump(Instant::now()), 1);
        assert_eq!(session.board().line_ids(), vec!["h1".to_string(), "live".to_string()]);
        assert!(session.transport().sent.is_empty());
    }

    #[test]
    fn test_jump_to_last_activity() {
        let mut session = session();
        assert!(session.jump_to_last_activity().is_none());
        draw_line(&mut session, Point::new(10.0, 10.0), Point::new(20.0, 30.0));
        let bounds = session.jump_to_last_activity().unwrap();
        assert!((bounds.x - 8.5).abs() < 1e-9);
        assert!((bounds.y - 8.5).abs() < 1e-9);
        assert!((bounds.width - 13.0).abs() < 1e-9);
        assert!((bounds.height - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_history_cap_bounds_live_session() {
        let mut session = BoardSession::new("me", LocalStore::new(Some(3)), RecordingTransport::default());
        for i in 0..6 {
            session.handle_remote(remote_draw(&format!("r{}", i)));
        }
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.board().lines.len(), 6);
    }

    fn sequenced_rows(log: &[Operation]) -> Vec<OperationRow> {
        log.iter()
            .enumerate()
            .map(|(i, op)| {
                let mut row = op.to_row("board", "class").unwrap();
                row.seq = i as u64 + 1;
                row
            })
            .collect()
    }

    #[test]
    fn test_history_overlapping_live_insert_applies_once() {
        let t0 = Instant::now();
        let socket = ScriptedSocket::default();
        let config = SessionConfig::new("board", "class").with_sender_id("me");
        let transport = SyncTransport::connect_at(config, socket.clone(), t0);
        let mut session = BoardSession::new("me", LocalStore::new(None), transport);
        session.pump(t0);
        socket.push_message(ServerMessage::Subscribed {
            channel: "board:board:me".to_string(),
        });
        session.pump(t0);

        let log = vec![remote_draw("a"), remote_draw("b"), serialize_undo_operation("them")];
        let rows = sequenced_rows(&log);
        socket.push_message(ServerMessage::Rows {
            board_id: "board".to_string(),
            rows: rows.clone(),
        });
        socket.push_message(ServerMessage::Insert { row: rows[2].clone() });
        assert_eq!(session.pump(t0), 0);

        let outcome = replay(&log, BoardState::new());
        assert_eq!(session.board().line_ids(), vec!["a".to_string()]);
        assert!(session.board().same_content(&outcome.state));
        assert_eq!(session.history().index(), outcome.final_index());
        assert!(socket.inserts().is_empty());
    }

    #[test]
    fn test_remote_log_matches_batch_replay() {
        let image = Image::new("https://example.com/cat.png", Point::new(5.0, 5.0), 40.0, 30.0).with_id("img");
        let c = Stroke::from_points(vec![7.0, 7.0, 9.0, 9.0]).with_id("c");
        let log = vec![
            serialize_undo_operation("them"),
            remote_draw("a"),
            remote_draw("b"),
            serialize_add_image_operation(&image, "u2"),
            serialize_update_line_operation("b", StrokePatch::position(3.0, 4.0), "them"),
            serialize_undo_operation("them"),
            serialize_undo_operation("u2"),
            serialize_redo_operation("them"),
            serialize_erase_operation(vec!["a".into()], "them"),
            serialize_undo_operation("them"),
            serialize_draw_operation(&c, "u2"),
            serialize_redo_operation("them"),
            serialize_update_image_operation("img", ImagePatch::locked(true), "them"),
            serialize_delete_objects_operation(vec!["b".into()], vec![], "u2"),
            serialize_undo_operation("them"),
        ];

        let mut session = session();
        for operation in log.iter().cloned() {
            session.handle_remote(operation);
        }

        let outcome = replay(&log, BoardState::new());
        assert!(session.board().same_content(&outcome.state));
        assert_eq!(session.history().index(), outcome.final_index());
        assert_eq!(session.history(), &outcome.history);
        assert!(session.transport().sent.is_empty());
    }

    #[test]
    fn test_load_history_keeps_board_when_replay_is_inconsistent() {
        let mut session = session();
        session.handle_remote(remote_draw("keep"));

        let image = Image::new("https://example.com/a.png", Point::ZERO, 10.0, 10.0).with_id("a");
        let rows = vec![
            remote_draw("a").to_row("board", "class").unwrap(),
            serialize_add_image_operation(&image, "them").to_row("board", "class").unwrap(),
        ];
        assert!(!session.load_history(&rows));
        assert_eq!(session.board().line_ids(), vec!["keep".to_string()]);
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_load_history_does_not_resurrect_erased_objects() {
        let mut session = session();
        session.handle_remote(remote_draw("x"));

        let rows = sequenced_rows(&[remote_draw("x"), serialize_erase_operation(vec!["x".into()], "them")]);
        assert!(session.load_history(&rows));
        assert!(session.board().is_empty());
        assert_eq!(session.history().len(), 3);
    }
}
