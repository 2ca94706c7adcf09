use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
///
/// One entry is one committed transaction: a multi-slot reservation is a single
/// `GroupReserved` entry, so a crash can never surface a partial group.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last durable flush. Recovery point for a
    /// failed batch: anything past it is not acknowledged.
    committed_len: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
        })
    }

    /// Append a single event and fsync. Used by tests only — production code
    /// uses `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        Ok(())
    }

    /// Discard buffered bytes and cut the file back to the last durable
    /// flush. Called after a failed batch: a partially-encoded record that
    /// spilled into the file must not sit in front of later appends, where
    /// replay would stop at it and drop everything behind it.
    pub fn truncate_to_committed(&mut self) -> io::Result<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        // into_parts drops the buffer without the flush-on-drop a plain
        // reassignment would trigger.
        let old = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        let (file, _discarded) = old.into_parts();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Rewrite the WAL with a minimal set of events that recreates the current
    /// state, then atomically swap it in. Runs at startup only — the request
    /// path never rewrites the log.
    pub fn compact(path: &Path, events: &[Event]) -> io::Result<Self> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, path)?;
        Self::open(path)
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            // Read length prefix
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            // Read payload
            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            // Read CRC
            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);
            let computed_crc = crc32fast::hash(&payload);

            if stored_crc != computed_crc {
                // Corrupt entry — stop replaying
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break, // corrupt payload
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    use crate::model::{GroupRecord, SlotRecord, TimeRange};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomledger_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn room_added(name: &str) -> Event {
        Event::RoomAdded {
            id: Ulid::new(),
            name: name.into(),
            seats: 8,
            category_id: None,
        }
    }

    fn group_reserved() -> Event {
        let gid = Ulid::new();
        Event::GroupReserved {
            room_id: Ulid::new(),
            group: GroupRecord {
                id: gid,
                user_id: 7,
                reservee: "doe".into(),
                email: "doe@example.com".into(),
                phone_number: "010".into(),
                reason: "study".into(),
            },
            slots: vec![SlotRecord {
                id: Ulid::new(),
                group_id: gid,
                range: TimeRange::new(1000, 2000).unwrap(),
            }],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let events = vec![room_added("A101"), group_reserved()];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = room_added("A101");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Append garbage to simulate a truncated second entry
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap(); // partial length + some bytes
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::RoomRemoved { id: Ulid::new() };

        // Manually write an entry with bad CRC
        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let keep = room_added("A101");

        // Write churn: one event to keep plus reservations that were deleted again
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            for _ in 0..10 {
                let e = group_reserved();
                wal.append(&e).unwrap();
                if let Event::GroupReserved { room_id, group, .. } = &e {
                    wal.append(&Event::GroupDeleted {
                        id: group.id,
                        room_id: *room_id,
                    })
                    .unwrap();
                }
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        assert!(before > 0);

        let compacted_events = vec![keep.clone()];
        {
            let _wal = Wal::compact(&path, &compacted_events).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, compacted_events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let kept = room_added("A101");
        let new_event = group_reserved();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
        }
        {
            let mut wal = Wal::compact(&path, std::slice::from_ref(&kept)).unwrap();
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], kept);
        assert_eq!(replayed[1], new_event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn truncate_discards_unflushed_and_spilled_bytes() {
        let path = tmp_path("truncate_recovery.wal");
        let _ = fs::remove_file(&path);

        let first = room_added("A101");
        let second = room_added("B202");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&first).unwrap();

        // A failed batch leaves bytes both in the buffer and (simulating a
        // spill) in the file past the committed point.
        wal.append_buffered(&room_added("discarded")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 9]).unwrap();
        }
        wal.truncate_to_committed().unwrap();

        // Later appends land on a record boundary and replay sees them —
        // nothing behind the failed batch is lost.
        wal.append(&second).unwrap();
        drop(wal);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<Event> = (0..5).map(|i| room_added(&format!("R{i}"))).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }
}
