use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix epoch seconds — the only time type.
pub type Sec = i64;

/// One week, the repeat step for recurring reservations.
pub const WEEK_SEC: Sec = 7 * 24 * 3600;

/// Latest accepted timestamp: 9999-12-31T23:59:59Z. Bounding the domain at
/// construction keeps all derived arithmetic (durations, weekly shifts)
/// inside i64.
pub const MAX_SEC: Sec = 253_402_300_799;

/// Rejected range: `start >= end`, or a bound outside `[0, MAX_SEC]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: Sec,
    pub end: Sec,
}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid time range: [{}, {})", self.start, self.end)
    }
}

impl std::error::Error for InvalidRange {}

/// Half-open interval `[start, end)` in epoch seconds.
///
/// Construction validates `0 <= start < end <= MAX_SEC`; every value that
/// exists is valid and all arithmetic on it stays in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: Sec,
    end: Sec,
}

impl TimeRange {
    pub fn new(start: Sec, end: Sec) -> Result<Self, InvalidRange> {
        if start < 0 || start >= end || end > MAX_SEC {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Sec {
        self.start
    }

    pub fn end(&self) -> Sec {
        self.end
    }

    pub fn duration_sec(&self) -> Sec {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Shift both bounds forward by `weeks` whole weeks. Fails when the
    /// shifted range would leave the accepted timestamp domain.
    pub fn shift_weeks(self, weeks: u32) -> Result<Self, InvalidRange> {
        let delta = WEEK_SEC * Sec::from(weeks);
        match (self.start.checked_add(delta), self.end.checked_add(delta)) {
            (Some(start), Some(end)) if end <= MAX_SEC => Ok(Self { start, end }),
            _ => Err(InvalidRange {
                start: self.start.saturating_add(delta),
                end: self.end.saturating_add(delta),
            }),
        }
    }
}

/// Room category, referenced (optionally) by rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Ulid,
    pub name: String,
    pub description: String,
}

/// One logical booking request. Owns its slots: deleting the group deletes
/// every slot that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: Ulid,
    /// Creator's caller id (0 when identity verification is bypassed).
    pub user_id: i64,
    pub reservee: String,
    pub email: String,
    pub phone_number: String,
    pub reason: String,
}

/// One concrete reserved interval for one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: Ulid,
    pub group_id: Ulid,
    pub range: TimeRange,
}

/// Per-room state: catalog fields plus every group and slot booked on the
/// room. Slots are kept sorted by `range.start` so overlap scans can binary
/// search the right edge.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub seats: u32,
    pub category_id: Option<Ulid>,
    pub groups: HashMap<Ulid, GroupRecord>,
    pub slots: Vec<SlotRecord>,
}

impl RoomState {
    pub fn new(id: Ulid, name: String, seats: u32, category_id: Option<Ulid>) -> Self {
        Self {
            id,
            name,
            seats,
            category_id,
            groups: HashMap::new(),
            slots: Vec::new(),
        }
    }

    /// Insert a slot maintaining sort order by range.start.
    pub fn insert_slot(&mut self, slot: SlotRecord) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.range.start(), |s| s.range.start())
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    /// Remove a slot by id.
    pub fn remove_slot(&mut self, id: Ulid) -> Option<SlotRecord> {
        if let Some(pos) = self.slots.iter().position(|s| s.id == id) {
            Some(self.slots.remove(pos))
        } else {
            None
        }
    }

    /// Return only slots whose range overlaps the query window.
    /// Everything at index >= right_bound starts at or after query.end and
    /// cannot overlap.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &SlotRecord> {
        let right_bound = self
            .slots
            .partition_point(|s| s.range.start() < query.end());
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.range.end() > query.start())
    }

    pub fn slots_of_group(&self, group_id: Ulid) -> impl Iterator<Item = &SlotRecord> {
        self.slots.iter().filter(move |s| s.group_id == group_id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// One record per transaction: a whole weekly series commits as a single
/// `GroupReserved`, so recovery never sees a half-created group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryAdded {
        id: Ulid,
        name: String,
        description: String,
    },
    CategoryRemoved {
        id: Ulid,
    },
    RoomAdded {
        id: Ulid,
        name: String,
        seats: u32,
        category_id: Option<Ulid>,
    },
    RoomRemoved {
        id: Ulid,
    },
    GroupReserved {
        room_id: Ulid,
        group: GroupRecord,
        slots: Vec<SlotRecord>,
    },
    SlotDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    GroupDeleted {
        id: Ulid,
        room_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: String,
    pub seats: u32,
    pub category_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub group_id: Ulid,
    pub reservee: String,
    pub start: Sec,
    pub end: Sec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: i64,
    pub reservee: String,
    pub email: String,
    pub phone_number: String,
    pub reason: String,
}
