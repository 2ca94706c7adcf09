use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

/// Fields of a reservation group before it has an identity.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub user_id: i64,
    pub reservee: String,
    pub email: String,
    pub phone_number: String,
    pub reason: String,
}

impl Store {
    pub async fn add_category(
        &self,
        name: String,
        description: String,
    ) -> Result<Category, StoreError> {
        let category = Category {
            id: Ulid::new(),
            name,
            description,
        };
        let event = Event::CategoryAdded {
            id: category.id,
            name: category.name.clone(),
            description: category.description.clone(),
        };
        self.wal_append(&event).await?;
        self.categories.insert(category.id, category.clone());
        Ok(category)
    }

    /// Delete a category. Rooms still referencing it keep working: the
    /// reference is cleared, not the rooms rejected.
    pub async fn delete_category(&self, id: Ulid) -> Result<(), StoreError> {
        if !self.categories.contains_key(&id) {
            return Err(StoreError::CategoryNotFound(id));
        }
        let event = Event::CategoryRemoved { id };
        self.wal_append(&event).await?;
        self.categories.remove(&id);
        // Collect the Arcs first: DashMap iteration guards must not be held
        // across an await point.
        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for room in rooms {
            let mut guard = room.write().await;
            if guard.category_id == Some(id) {
                guard.category_id = None;
            }
        }
        Ok(())
    }

    pub async fn add_room(
        &self,
        name: String,
        seats: u32,
        category_id: Option<Ulid>,
    ) -> Result<RoomInfo, StoreError> {
        if let Some(cid) = category_id
            && !self.categories.contains_key(&cid)
        {
            return Err(StoreError::CategoryNotFound(cid));
        }
        let id = Ulid::new();
        let event = Event::RoomAdded {
            id,
            name: name.clone(),
            seats,
            category_id,
        };
        self.wal_append(&event).await?;
        let room = RoomState::new(id, name.clone(), seats, category_id);
        self.rooms
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(room)));
        // delete_category may have raced between the existence check and the
        // insert: its clearing pass cannot have seen this room. Re-check and
        // clear the reference ourselves, like replay does.
        if let Some(cid) = category_id
            && !self.categories.contains_key(&cid)
        {
            let room = self.get_room(&id).ok_or(StoreError::RoomNotFound(id))?;
            room.write().await.category_id = None;
            return Ok(RoomInfo {
                id,
                name,
                seats,
                category_id: None,
            });
        }
        Ok(RoomInfo {
            id,
            name,
            seats,
            category_id,
        })
    }

    /// Delete a room. Rejected while reservations exist on it — groups
    /// reference rooms, they are not owned by them.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), StoreError> {
        let room = self.get_room(&id).ok_or(StoreError::RoomNotFound(id))?;
        let guard = room.write().await;
        if !guard.slots.is_empty() {
            return Err(StoreError::RoomInUse(id));
        }
        let event = Event::RoomRemoved { id };
        self.wal_append(&event).await?;
        self.rooms.remove(&id);
        Ok(())
    }

    /// Atomically reserve a group with one slot per range. All-or-nothing:
    /// if any range overlaps a committed slot of the room (or an earlier
    /// range of the same batch), nothing is inserted. Returns the group id
    /// and the slot ids in range order.
    pub async fn reserve_group(
        &self,
        room_id: Ulid,
        new_group: NewGroup,
        ranges: &[TimeRange],
    ) -> Result<(Ulid, Vec<Ulid>), StoreError> {
        let room = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let mut guard = room.write().await;

        // Overlap check under the room lock — this is the exclusion
        // constraint. Concurrent reservations for the same room serialize
        // here, so the check cannot race the insert.
        for range in ranges {
            if let Some(existing) = guard.overlapping(range).next() {
                metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                return Err(StoreError::Conflict { slot: existing.id });
            }
        }

        let group_id = Ulid::new();
        let slots: Vec<SlotRecord> = ranges
            .iter()
            .map(|range| SlotRecord {
                id: Ulid::new(),
                group_id,
                range: *range,
            })
            .collect();

        // Intra-batch check: a series whose occurrences are longer than the
        // repeat step overlaps itself.
        for i in 0..slots.len() {
            for j in (i + 1)..slots.len() {
                if slots[i].range.overlaps(&slots[j].range) {
                    metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL)
                        .increment(1);
                    return Err(StoreError::Conflict { slot: slots[i].id });
                }
            }
        }

        let slot_ids: Vec<Ulid> = slots.iter().map(|s| s.id).collect();
        let event = Event::GroupReserved {
            room_id,
            group: GroupRecord {
                id: group_id,
                user_id: new_group.user_id,
                reservee: new_group.reservee,
                email: new_group.email,
                phone_number: new_group.phone_number,
                reason: new_group.reason,
            },
            slots,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL).increment(1);
        metrics::counter!(crate::observability::SLOTS_RESERVED_TOTAL)
            .increment(slot_ids.len() as u64);
        Ok((group_id, slot_ids))
    }

    /// Delete a single slot. Deleting the last slot of a group deletes the
    /// group as well. Fails with SlotNotFound when nothing is affected —
    /// deleting an already-deleted slot is an error, not a silent success.
    pub async fn delete_slot(&self, slot_id: Ulid) -> Result<(), StoreError> {
        let (room_id, mut guard) = self.resolve_slot_write(&slot_id).await?;
        // The index lookup ran before the lock was held; re-check under it.
        if !guard.slots.iter().any(|s| s.id == slot_id) {
            return Err(StoreError::SlotNotFound(slot_id));
        }
        let event = Event::SlotDeleted { id: slot_id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete a group and, by composition, every slot it owns.
    pub async fn delete_group(&self, group_id: Ulid) -> Result<(), StoreError> {
        let (room_id, mut guard) = self.resolve_group_write(&group_id).await?;
        if !guard.groups.contains_key(&group_id) {
            return Err(StoreError::GroupNotFound(group_id));
        }
        let event = Event::GroupDeleted { id: group_id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }
}
