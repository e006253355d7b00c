use bytes::Bytes;

use crate::decoder::Payload;

#[derive(Debug, Default)]
enum CursorState {
    /// No payload bound, or the last bound payload was fully read.
    #[default]
    Idle,
    /// Reading rows from a payload.
    ///
    /// `offset` always points at an unread row. Reading the last row moves
    /// the cursor back to `Idle`.
    Bound { payload: Payload, offset: usize },
}

/// Produces rows one at a time from a single bound payload.
#[derive(Debug, Default)]
pub struct RowCursor {
    state: CursorState,
}

impl RowCursor {
    pub fn new() -> Self {
        RowCursor {
            state: CursorState::Idle,
        }
    }

    /// If there are unread rows in the bound payload.
    pub fn is_valid(&self) -> bool {
        matches!(self.state, CursorState::Bound { .. })
    }

    /// Source of the currently bound payload.
    pub fn source(&self) -> Option<usize> {
        match &self.state {
            CursorState::Bound { payload, .. } => Some(payload.source()),
            CursorState::Idle => None,
        }
    }

    /// Get the current row without advancing.
    pub fn current(&self) -> Option<Bytes> {
        match &self.state {
            CursorState::Bound { payload, offset } => Some(payload.row_at(*offset).0),
            CursorState::Idle => None,
        }
    }

    /// Move to the next row, releasing the payload once all its rows have
    /// been read.
    pub fn advance(&mut self) {
        let next_state = match std::mem::take(&mut self.state) {
            CursorState::Bound { payload, offset } => {
                let (_, next) = payload.row_at(offset);
                if next < payload.data().len() {
                    CursorState::Bound {
                        payload,
                        offset: next,
                    }
                } else {
                    CursorState::Idle
                }
            }
            CursorState::Idle => CursorState::Idle,
        };
        self.state = next_state;
    }

    /// Bind a new payload.
    ///
    /// Panics if the current payload still has unread rows.
    pub fn bind(&mut self, payload: Payload) {
        assert!(
            !self.is_valid(),
            "attempted to bind payload for source {} while rows remain",
            payload.source()
        );
        self.state = CursorState::Bound { payload, offset: 0 };
    }

    /// Drop the bound payload, even if it has unread rows.
    pub fn release(&mut self) {
        self.state = CursorState::Idle;
    }
}
