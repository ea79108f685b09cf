//! Event subscription flags and wire ids of the sync protocol.

bitflags::bitflags! {
    /// Which master events a slave wants relayed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncEventFlags: u32 {
        const UPDATE_BEFORE = 0b0001;
        const UPDATING      = 0b0010;
        const UPDATE_AFTER  = 0b0100;
        const RESET         = 0b1000;
    }
}

/// Standard subscription sets.
///
/// A slave that forwards the full update bracket to its local listeners
/// subscribes to all four events; otherwise the updating and reset events
/// are enough.
pub fn subscription_for(before_and_after: bool) -> SyncEventFlags {
    if before_and_after {
        SyncEventFlags::UPDATE_BEFORE
            | SyncEventFlags::UPDATING
            | SyncEventFlags::UPDATE_AFTER
            | SyncEventFlags::RESET
    } else {
        SyncEventFlags::UPDATING | SyncEventFlags::RESET
    }
}

/// One relayed master event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    UpdateBefore,
    Updating,
    UpdateAfter,
    Reset,
}

impl SyncEventKind {
    pub fn as_wire_id(self) -> i64 {
        match self {
            SyncEventKind::UpdateBefore => 1,
            SyncEventKind::Updating => 2,
            SyncEventKind::UpdateAfter => 3,
            SyncEventKind::Reset => 4,
        }
    }

    pub fn from_wire_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(SyncEventKind::UpdateBefore),
            2 => Some(SyncEventKind::Updating),
            3 => Some(SyncEventKind::UpdateAfter),
            4 => Some(SyncEventKind::Reset),
            _ => None,
        }
    }

    /// The subscription flag covering this event.
    pub fn flag(self) -> SyncEventFlags {
        match self {
            SyncEventKind::UpdateBefore => SyncEventFlags::UPDATE_BEFORE,
            SyncEventKind::Updating => SyncEventFlags::UPDATING,
            SyncEventKind::UpdateAfter => SyncEventFlags::UPDATE_AFTER,
            SyncEventKind::Reset => SyncEventFlags::RESET,
        }
    }
}
