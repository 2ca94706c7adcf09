use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::auth::{Caller, Unauthenticated};
use crate::config::Config;
use crate::expand::{RepeatError, expand_weekly};
use crate::model::{GroupInfo, InvalidRange, Sec, SlotInfo, TimeRange};
use crate::policy;
use crate::store::{NewGroup, Store, StoreError};

/// Service-level failure taxonomy. Every variant is client-visible; nothing
/// here is retried — a conflicting booking conflicts again.
#[derive(Debug)]
pub enum Error {
    InvalidRange { start: Sec, end: Sec },
    InvalidRepeats(u32),
    TooManyRepeats { requested: u32, limit: u32 },
    WindowTooWide { requested: Sec, limit: Sec },
    RoomNotFound(Ulid),
    CategoryNotFound(Ulid),
    SlotNotFound(Ulid),
    GroupNotFound(Ulid),
    Conflict { slot: Ulid },
    RoomInUse(Ulid),
    Forbidden,
    Unauthenticated(String),
    Storage(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidRange { start, end } => {
                write!(f, "invalid time range: [{start}, {end})")
            }
            Error::InvalidRepeats(n) => write!(f, "repeats is less than 1: {n}"),
            Error::TooManyRepeats { requested, limit } => {
                write!(f, "too many repeats: {requested} > {limit}")
            }
            Error::WindowTooWide { requested, limit } => {
                write!(f, "time range is too wide: {requested} > {limit}")
            }
            Error::RoomNotFound(id) => write!(f, "room not found: {id}"),
            Error::CategoryNotFound(id) => write!(f, "category not found: {id}"),
            Error::SlotNotFound(id) => write!(f, "schedule not found: {id}"),
            Error::GroupNotFound(id) => write!(f, "schedule group not found: {id}"),
            Error::Conflict { slot } => {
                write!(f, "time slot conflicts with existing reservation {slot}")
            }
            Error::RoomInUse(id) => write!(f, "room {id} still has reservations"),
            Error::Forbidden => write!(f, "you are not the owner of the schedule"),
            Error::Unauthenticated(msg) => write!(f, "failed to verify token: {msg}"),
            Error::Storage(msg) => write!(f, "storage failure: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<InvalidRange> for Error {
    fn from(e: InvalidRange) -> Self {
        Error::InvalidRange {
            start: e.start,
            end: e.end,
        }
    }
}

impl From<RepeatError> for Error {
    fn from(e: RepeatError) -> Self {
        match e {
            RepeatError::InvalidRepeats(n) => Error::InvalidRepeats(n),
            RepeatError::TooManyRepeats { requested, limit } => {
                Error::TooManyRepeats { requested, limit }
            }
            RepeatError::OutOfRange { start, end } => Error::InvalidRange { start, end },
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoomNotFound(id) => Error::RoomNotFound(id),
            StoreError::CategoryNotFound(id) => Error::CategoryNotFound(id),
            StoreError::SlotNotFound(id) => Error::SlotNotFound(id),
            StoreError::GroupNotFound(id) => Error::GroupNotFound(id),
            StoreError::Conflict { slot } => Error::Conflict { slot },
            StoreError::RoomInUse(id) => Error::RoomInUse(id),
            StoreError::Wal(msg) => Error::Storage(msg),
        }
    }
}

impl From<Unauthenticated> for Error {
    fn from(e: Unauthenticated) -> Self {
        Error::Unauthenticated(e.0)
    }
}

/// Parsed, validated create request — the transport already did the shape work.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub room_id: Ulid,
    pub reservee: String,
    pub email: String,
    pub phone_number: String,
    pub reason: String,
    pub start: Sec,
    pub end: Sec,
    pub repeats: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationCreated {
    pub group_id: Ulid,
    pub slot_ids: Vec<Ulid>,
}

/// Orchestrator for reservations: validates and expands before any storage
/// touch, then drives the store, whose per-room transaction makes the whole
/// series atomic.
pub struct BookingService {
    store: Arc<Store>,
    repeat_limit: u32,
    window_limit_sec: Sec,
    admin_permission: i64,
}

impl BookingService {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        Self {
            store,
            repeat_limit: config.repeat_limit,
            window_limit_sec: config.window_limit_sec,
            admin_permission: config.admin_permission,
        }
    }

    pub async fn create(
        &self,
        caller: &Caller,
        req: CreateReservation,
    ) -> Result<ReservationCreated, Error> {
        // All validation happens before storage is touched.
        let base = TimeRange::new(req.start, req.end)?;
        let ranges = expand_weekly(base, req.repeats, self.repeat_limit)?;

        let group = NewGroup {
            user_id: caller.user_id,
            reservee: req.reservee,
            email: req.email,
            phone_number: req.phone_number,
            reason: req.reason,
        };
        let (group_id, slot_ids) = self
            .store
            .reserve_group(req.room_id, group, &ranges)
            .await?;
        info!(
            room = %req.room_id,
            group = %group_id,
            slots = slot_ids.len(),
            "reservation created"
        );
        Ok(ReservationCreated { group_id, slot_ids })
    }

    pub async fn delete(
        &self,
        caller: &Caller,
        slot_id: Ulid,
        delete_all_in_group: bool,
    ) -> Result<(), Error> {
        let slot = self.store.get_slot(slot_id).await?;
        let group = self.store.get_group(slot.group_id).await?;
        if !policy::may_modify(caller, group.user_id, self.admin_permission) {
            return Err(Error::Forbidden);
        }
        if delete_all_in_group {
            self.store.delete_group(slot.group_id).await?;
            info!(group = %slot.group_id, "reservation group deleted");
        } else {
            self.store.delete_slot(slot_id).await?;
            info!(slot = %slot_id, "reservation slot deleted");
        }
        Ok(())
    }

    pub async fn slots_in_window(
        &self,
        room_id: Ulid,
        start: Sec,
        end: Sec,
    ) -> Result<Vec<SlotInfo>, Error> {
        let window = TimeRange::new(start, end)?;
        if window.duration_sec() > self.window_limit_sec {
            return Err(Error::WindowTooWide {
                requested: window.duration_sec(),
                limit: self.window_limit_sec,
            });
        }
        Ok(self.store.slots_in_window(room_id, &window).await)
    }

    /// Full group record, visible to its owner and administrators only.
    pub async fn group_detail(&self, caller: &Caller, group_id: Ulid) -> Result<GroupInfo, Error> {
        let group = self.store.get_group(group_id).await?;
        if !policy::may_modify(caller, group.user_id, self.admin_permission) {
            return Err(Error::Forbidden);
        }
        Ok(group)
    }
}
