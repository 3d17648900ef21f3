//! Pointer input translation: frame-delimited event batching.
//!
//! The compositor groups logically simultaneous pointer events and
//! terminates each group with a `frame` marker. Events are buffered per
//! entered surface and handed to the input collaborator as one atomic
//! batch when the marker arrives; the marker itself is never forwarded.

use crate::protocol::wl_pointer::ButtonState;

/// A translated pointer transition, delivered in frame batches.
#[derive(Clone, PartialEq, Debug)]
pub enum PointerEvent {
    Enter { surface: u32, x: f64, y: f64 },
    Leave { surface: u32 },
    Motion { time: u32, x: f64, y: f64 },
    Button { serial: u32, time: u32, button: u32, state: ButtonState },
}

/// Per-pointer batching state, scoped to the currently entered surface.
#[derive(Debug, Default)]
pub(crate) struct PointerState {
    focus: Option<u32>,
    batch: Vec<PointerEvent>,
}

impl PointerState {
    pub fn new() -> PointerState {
        PointerState::default()
    }

    pub fn enter(&mut self, surface: u32, x: f64, y: f64) {
        self.focus = Some(surface);
        self.batch.push(PointerEvent::Enter { surface, x, y });
    }

    /// Residency on the surface ends. Anything buffered but not yet
    /// flushed is discarded rather than forwarded as a partial batch;
    /// only the Leave transition itself is kept for the next frame.
    pub fn leave(&mut self, surface: u32) {
        self.batch.clear();
        self.batch.push(PointerEvent::Leave { surface });
        self.focus = None;
    }

    pub fn motion(&mut self, time: u32, x: f64, y: f64) {
        if self.focus.is_some() {
            self.batch.push(PointerEvent::Motion { time, x, y });
        }
    }

    pub fn button(&mut self, serial: u32, time: u32, button: u32, state: ButtonState) {
        if self.focus.is_some() {
            self.batch.push(PointerEvent::Button { serial, time, button, state });
        }
    }

    /// Frame marker: take the completed batch, if any.
    pub fn frame(&mut self) -> Option<Vec<PointerEvent>> {
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::replace(&mut self.batch, Vec::new()))
        }
    }

    /// Forget everything; used when the pointer device goes away.
    pub fn reset(&mut self) {
        self.focus = None;
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_flushes_one_ordered_batch() {
        let mut pointer = PointerState::new();
        pointer.enter(4, 10.0, 20.0);
        pointer.motion(1, 11.0, 20.0);
        pointer.motion(2, 12.0, 20.0);
        pointer.button(100, 3, 0x110, ButtonState::Pressed);
        let batch = pointer.frame().expect("batch should flush");
        assert_eq!(
            batch,
            vec![
                PointerEvent::Enter { surface: 4, x: 10.0, y: 20.0 },
                PointerEvent::Motion { time: 1, x: 11.0, y: 20.0 },
                PointerEvent::Motion { time: 2, x: 12.0, y: 20.0 },
                PointerEvent::Button { serial: 100, time: 3, button: 0x110, state: ButtonState::Pressed },
            ]
        );
        // the buffer is empty again but focus is kept
        assert!(pointer.frame().is_none());
        pointer.motion(4, 13.0, 20.0);
        assert_eq!(pointer.frame().expect("still active").len(), 1);
    }

    #[test]
    fn leave_discards_the_partial_batch() {
        let mut pointer = PointerState::new();
        pointer.enter(4, 0.0, 0.0);
        pointer.frame();
        pointer.motion(1, 5.0, 5.0);
        pointer.button(7, 2, 0x110, ButtonState::Pressed);
        pointer.leave(4);
        let batch = pointer.frame().expect("leave still gets delivered");
        assert_eq!(batch, vec![PointerEvent::Leave { surface: 4 }]);
    }

    #[test]
    fn events_without_focus_are_dropped() {
        let mut pointer = PointerState::new();
        pointer.motion(1, 5.0, 5.0);
        pointer.button(7, 2, 0x110, ButtonState::Released);
        assert!(pointer.frame().is_none());
    }

    #[test]
    fn frame_without_events_is_not_an_event() {
        let mut pointer = PointerState::new();
        pointer.enter(4, 0.0, 0.0);
        pointer.frame();
        // a bare frame marker must not produce an empty batch
        assert!(pointer.frame().is_none());
    }
}
