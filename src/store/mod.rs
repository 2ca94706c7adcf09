mod error;
mod mutations;
mod queries;

pub use error::StoreError;
pub use mutations::NewGroup;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd;
        let mut batch = vec![(event, response)];

        // Drain all immediately available appends
        while let Ok(WalCommand::Append { event, response }) = rx.try_recv() {
            batch.push((event, response));
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &mut batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(&mut batch, &result);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    // The whole batch fails together: on any error, cut the log back to the
    // last durable flush so no partial record sits in front of later
    // appends — replay would stop there and drop acknowledged commits.
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            if let Err(trunc) = wal.truncate_to_committed() {
                tracing::error!("WAL truncate after failed append: {trunc}");
            }
            return Err(e);
        }
    }
    match wal.flush_sync() {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(trunc) = wal.truncate_to_committed() {
                tracing::error!("WAL truncate after failed flush: {trunc}");
            }
            Err(e)
        }
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// The storage gateway: the only component that enforces the no-overlap
/// invariant. A "transaction" is the room's write lock held across validate,
/// a single WAL record, and the in-memory apply — concurrent bookings on the
/// same room serialize on the lock, and the overlap check runs after the lock
/// is acquired, so check-then-insert has no race window.
pub struct Store {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) categories: DashMap<Ulid, Category>,
    /// Reverse lookup: slot id → room id.
    pub(super) slot_rooms: DashMap<Ulid, Ulid>,
    /// Reverse lookup: group id → room id.
    pub(super) group_rooms: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a reservation event directly to a RoomState (no locking — caller
/// holds the lock). Catalog events are handled at the map level, not here.
fn apply_to_room(
    room: &mut RoomState,
    event: &Event,
    slot_rooms: &DashMap<Ulid, Ulid>,
    group_rooms: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::GroupReserved { room_id, group, slots } => {
            room.groups.insert(group.id, group.clone());
            group_rooms.insert(group.id, *room_id);
            for slot in slots {
                room.insert_slot(*slot);
                slot_rooms.insert(slot.id, *room_id);
            }
        }
        Event::SlotDeleted { id, .. } => {
            if let Some(removed) = room.remove_slot(*id) {
                slot_rooms.remove(id);
                // A group exists only as the container of its slots: deleting
                // the last slot deletes the group.
                if room.slots_of_group(removed.group_id).next().is_none() {
                    room.groups.remove(&removed.group_id);
                    group_rooms.remove(&removed.group_id);
                }
            }
        }
        Event::GroupDeleted { id, .. } => {
            let slot_ids: Vec<Ulid> = room.slots_of_group(*id).map(|s| s.id).collect();
            for sid in slot_ids {
                room.remove_slot(sid);
                slot_rooms.remove(&sid);
            }
            room.groups.remove(id);
            group_rooms.remove(id);
        }
        Event::CategoryAdded { .. }
        | Event::CategoryRemoved { .. }
        | Event::RoomAdded { .. }
        | Event::RoomRemoved { .. } => {}
    }
}

impl Store {
    /// Open the store: replay the WAL, rebuild state, compact the log in place,
    /// then start the group-commit writer. Must run inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;

        let rooms: DashMap<Ulid, SharedRoomState> = DashMap::new();
        let categories: DashMap<Ulid, Category> = DashMap::new();
        let slot_rooms: DashMap<Ulid, Ulid> = DashMap::new();
        let group_rooms: DashMap<Ulid, Ulid> = DashMap::new();

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention).
        for event in &events {
            match event {
                Event::CategoryAdded { id, name, description } => {
                    categories.insert(
                        *id,
                        Category {
                            id: *id,
                            name: name.clone(),
                            description: description.clone(),
                        },
                    );
                }
                Event::CategoryRemoved { id } => {
                    categories.remove(id);
                    for entry in rooms.iter() {
                        let room = entry.value().clone();
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        if guard.category_id == Some(*id) {
                            guard.category_id = None;
                        }
                    }
                }
                Event::RoomAdded { id, name, seats, category_id } => {
                    // A record written under a racing category deletion can
                    // carry a reference the log has already removed; clear it
                    // rather than resurrect it.
                    let category_id = (*category_id).filter(|cid| categories.contains_key(cid));
                    let room = RoomState::new(*id, name.clone(), *seats, category_id);
                    rooms.insert(*id, Arc::new(RwLock::new(room)));
                }
                Event::RoomRemoved { id } => {
                    rooms.remove(id);
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = rooms.get(&room_id)
                    {
                        let room = entry.value().clone();
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &slot_rooms, &group_rooms);
                    }
                }
            }
        }

        // Startup compaction: rewrite the log as the minimal event set for the
        // current state. There is no background compactor — this is the only
        // place the WAL shrinks.
        let snapshot = snapshot_events(&categories, &rooms);
        let wal = Wal::compact(wal_path, &snapshot)?;

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            rooms,
            categories,
            slot_rooms,
            group_rooms,
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub(super) fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_slot(&self, slot_id: &Ulid) -> Option<Ulid> {
        self.slot_rooms.get(slot_id).map(|e| *e.value())
    }

    pub fn room_for_group(&self, group_id: &Ulid) -> Option<Ulid> {
        self.group_rooms.get(group_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. The WAL record is written before any
    /// in-memory mutation, so a failed append leaves the store untouched —
    /// that is the whole rollback.
    pub(super) async fn persist_and_apply(
        &self,
        room: &mut RoomState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_room(room, event, &self.slot_rooms, &self.group_rooms);
        Ok(())
    }

    /// Lookup slot → room, get room, acquire write lock.
    pub(super) async fn resolve_slot_write(
        &self,
        slot_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), StoreError> {
        let room_id = self
            .room_for_slot(slot_id)
            .ok_or(StoreError::SlotNotFound(*slot_id))?;
        let room = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = room.write_owned().await;
        Ok((room_id, guard))
    }

    /// Lookup group → room, get room, acquire write lock.
    pub(super) async fn resolve_group_write(
        &self,
        group_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), StoreError> {
        let room_id = self
            .room_for_group(group_id)
            .ok_or(StoreError::GroupNotFound(*group_id))?;
        let room = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = room.write_owned().await;
        Ok((room_id, guard))
    }
}

/// Extract the room id from a reservation event (None for catalog events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::GroupReserved { room_id, .. }
        | Event::SlotDeleted { room_id, .. }
        | Event::GroupDeleted { room_id, .. } => Some(*room_id),
        Event::CategoryAdded { .. }
        | Event::CategoryRemoved { .. }
        | Event::RoomAdded { .. }
        | Event::RoomRemoved { .. } => None,
    }
}

/// Minimal event set that recreates the current state: categories, rooms,
/// then one GroupReserved per surviving group. Startup-only (uncontended).
fn snapshot_events(
    categories: &DashMap<Ulid, Category>,
    rooms: &DashMap<Ulid, SharedRoomState>,
) -> Vec<Event> {
    let mut events = Vec::new();
    for entry in categories.iter() {
        let c = entry.value();
        events.push(Event::CategoryAdded {
            id: c.id,
            name: c.name.clone(),
            description: c.description.clone(),
        });
    }
    for entry in rooms.iter() {
        let room = entry.value().clone();
        let guard = room.try_read().expect("snapshot: uncontended read");
        events.push(Event::RoomAdded {
            id: guard.id,
            name: guard.name.clone(),
            seats: guard.seats,
            category_id: guard.category_id,
        });
        for group in guard.groups.values() {
            let slots: Vec<SlotRecord> = guard.slots_of_group(group.id).copied().collect();
            events.push(Event::GroupReserved {
                room_id: guard.id,
                group: group.clone(),
                slots,
            });
        }
    }
    events
}
