use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{
    domain::{CommissionId, CommissionStatus, UserId},
    protocol::CommissionListItem,
};

use crate::CommissionBackend;

/// Column order of the status board. Drafts never appear on it.
pub const STATUS_ORDER: [CommissionStatus; 5] = [
    CommissionStatus::Submitted,
    CommissionStatus::Waitlist,
    CommissionStatus::Payment,
    CommissionStatus::Wip,
    CommissionStatus::Finished,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub commission_id: CommissionId,
    pub from: CommissionStatus,
    pub to: CommissionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragState {
    Idle,
    Dragging {
        card: CommissionId,
        from: CommissionStatus,
        drop_hint: Option<(CommissionStatus, usize)>,
    },
}

/// Drag-and-drop state machine for the admin status board. Card moves
/// are applied optimistically; `commit_drag` persists the change.
pub struct KanbanBoard {
    cards: Vec<CommissionListItem>,
    drag: DragState,
}

impl KanbanBoard {
    pub fn new(cards: Vec<CommissionListItem>) -> Self {
        Self {
            cards,
            drag: DragState::Idle,
        }
    }

    pub fn replace_cards(&mut self, cards: Vec<CommissionListItem>) {
        self.cards = cards;
        self.drag = DragState::Idle;
    }

    pub fn cards(&self) -> &[CommissionListItem] {
        &self.cards
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging { .. })
    }

    /// The board grouped into its fixed columns. Cards whose status has
    /// no column (drafts) are not shown.
    pub fn grouped(&self) -> Vec<(CommissionStatus, Vec<&CommissionListItem>)> {
        STATUS_ORDER
            .iter()
            .map(|status| {
                let column = self
                    .cards
                    .iter()
                    .filter(|card| card.commission.status == *status)
                    .collect();
                (*status, column)
            })
            .collect()
    }

    /// Starts a drag. An id the board does not know leaves it idle.
    pub fn drag_start(&mut self, card: CommissionId) {
        let Some(item) = self.cards.iter().find(|item| item.commission.id == card) else {
            self.drag = DragState::Idle;
            return;
        };
        self.drag = DragState::Dragging {
            card,
            from: item.commission.status,
            drop_hint: None,
        };
    }

    /// Records where the card currently hovers. The drop index is the
    /// hovered card's position within the target column, or the end of
    /// the column when hovering empty space.
    pub fn drag_over(&mut self, status: CommissionStatus, hovered: Option<CommissionId>) {
        let DragState::Dragging { card, from, .. } = self.drag else {
            return;
        };
        let column_len = self
            .cards
            .iter()
            .filter(|item| item.commission.status == status)
            .count();
        let index = hovered
            .and_then(|id| {
                self.cards
                    .iter()
                    .filter(|item| item.commission.status == status)
                    .position(|item| item.commission.id == id)
            })
            .unwrap_or(column_len);
        self.drag = DragState::Dragging {
            card,
            from,
            drop_hint: Some((status, index)),
        };
    }

    /// Ends the drag. Dropping on a different column rewrites the card's
    /// status in place and reports the change to persist; dropping back
    /// on the source column or outside any column is a no-op.
    pub fn drag_end(&mut self, target: Option<CommissionStatus>) -> Option<StatusChange> {
        let DragState::Dragging { card, from, .. } = self.drag else {
            return None;
        };
        self.drag = DragState::Idle;

        let to = target?;
        if to == from {
            return None;
        }

        if let Some(item) = self.cards.iter_mut().find(|item| item.commission.id == card) {
            item.commission.status = to;
        }
        Some(StatusChange {
            commission_id: card,
            from,
            to,
        })
    }

    pub fn drag_cancel(&mut self) {
        self.drag = DragState::Idle;
    }

    /// Persists an optimistic move. The card keeps its new column even
    /// when the call fails; the next board refresh reconciles.
    pub async fn commit_drag(
        &mut self,
        backend: &Arc<dyn CommissionBackend>,
        admin_id: UserId,
        change: StatusChange,
    ) -> Result<()> {
        let updated = backend
            .update_status(admin_id, change.commission_id, change.to)
            .await
            .context("persisting status change failed")?;
        if let Some(item) = self
            .cards
            .iter_mut()
            .find(|item| item.commission.id == updated.id)
        {
            item.commission = updated;
        }
        Ok(())
    }
}
