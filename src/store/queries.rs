use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

impl Store {
    /// Slots of a room fully contained in the query window, joined with the
    /// owning group's reservee, ordered by start. An unknown room yields an
    /// empty list, like a query over no rows.
    pub async fn slots_in_window(
        &self,
        room_id: Ulid,
        window: &TimeRange,
    ) -> Vec<SlotInfo> {
        let Some(room) = self.get_room(&room_id) else {
            return Vec::new();
        };
        let guard = room.read().await;
        guard
            .slots
            .iter()
            .filter(|s| window.contains_range(&s.range))
            .map(|s| SlotInfo {
                id: s.id,
                room_id,
                group_id: s.group_id,
                reservee: guard
                    .groups
                    .get(&s.group_id)
                    .map(|g| g.reservee.clone())
                    .unwrap_or_default(),
                start: s.range.start(),
                end: s.range.end(),
            })
            .collect()
    }

    pub async fn get_slot(&self, slot_id: Ulid) -> Result<SlotInfo, StoreError> {
        let room_id = self
            .room_for_slot(&slot_id)
            .ok_or(StoreError::SlotNotFound(slot_id))?;
        let room = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = room.read().await;
        let slot = guard
            .slots
            .iter()
            .find(|s| s.id == slot_id)
            .ok_or(StoreError::SlotNotFound(slot_id))?;
        Ok(SlotInfo {
            id: slot.id,
            room_id,
            group_id: slot.group_id,
            reservee: guard
                .groups
                .get(&slot.group_id)
                .map(|g| g.reservee.clone())
                .unwrap_or_default(),
            start: slot.range.start(),
            end: slot.range.end(),
        })
    }

    pub async fn get_group(&self, group_id: Ulid) -> Result<GroupInfo, StoreError> {
        let room_id = self
            .room_for_group(&group_id)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        let room = self
            .get_room(&room_id)
            .ok_or(StoreError::RoomNotFound(room_id))?;
        let guard = room.read().await;
        let group = guard
            .groups
            .get(&group_id)
            .ok_or(StoreError::GroupNotFound(group_id))?;
        Ok(GroupInfo {
            id: group.id,
            room_id,
            user_id: group.user_id,
            reservee: group.reservee.clone(),
            email: group.email.clone(),
            phone_number: group.phone_number.clone(),
            reason: group.reason.clone(),
        })
    }

    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        // Collect the Arcs first: DashMap iteration guards must not be held
        // across an await point.
        let shared: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(shared.len());
        for room in shared {
            let guard = room.read().await;
            rooms.push(RoomInfo {
                id: guard.id,
                name: guard.name.clone(),
                seats: guard.seats,
                category_id: guard.category_id,
            });
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn list_categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> =
            self.categories.iter().map(|e| e.value().clone()).collect();
        categories.sort_by_key(|c| c.id);
        categories
    }
}
