use ulid::Ulid;

#[derive(Debug)]
pub enum StoreError {
    RoomNotFound(Ulid),
    CategoryNotFound(Ulid),
    SlotNotFound(Ulid),
    GroupNotFound(Ulid),
    /// The requested interval overlaps the committed slot with this id
    /// (or an earlier slot of the same batch).
    Conflict { slot: Ulid },
    /// The room still has reservations and cannot be deleted.
    RoomInUse(Ulid),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            StoreError::CategoryNotFound(id) => write!(f, "category not found: {id}"),
            StoreError::SlotNotFound(id) => write!(f, "slot not found: {id}"),
            StoreError::GroupNotFound(id) => write!(f, "reservation group not found: {id}"),
            StoreError::Conflict { slot } => write!(f, "conflict with slot: {slot}"),
            StoreError::RoomInUse(id) => {
                write!(f, "cannot delete room {id}: reservations exist")
            }
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
