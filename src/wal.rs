use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a single record to [len][bincode][crc32] format. Returns the frame size.
fn encode_record<T: Serialize>(writer: &mut impl Write, record: &T) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of `T` records.
///
/// Format per entry: `[u32: len][bincode: T][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is discarded on replay.
///
/// Records buffered since the last successful `flush_sync()` can be taken
/// back with `rollback()`, which cuts the file to its last committed length.
pub struct Wal<T> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    committed_len: u64,
    committed_appends: u64,
    pending_len: u64,
    /// Set when a rollback could not restore the file.
    poisoned: bool,
    _record: PhantomData<fn(T)>,
}

impl<T: Serialize + DeserializeOwned> Wal<T> {
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            committed_appends: 0,
            pending_len: 0,
            poisoned: false,
            _record: PhantomData,
        })
    }

    fn check_usable(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("journal refused write after failed rollback"));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &T) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without flushing. `flush_sync()` commits the batch.
    pub fn append_buffered(&mut self, record: &T) -> io::Result<()> {
        self.check_usable()?;
        self.pending_len += encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_usable()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Discard everything written since the last successful `flush_sync()`.
    /// If the file can't be cut back, every later write fails until the
    /// log is compacted.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // `into_parts` hands back the buffer without writing it.
        let (_, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        self.writer.get_ref().set_len(self.committed_len)?;
        self.writer.get_ref().sync_all()?;
        self.pending_len = 0;
        self.appends_since_compact = self.committed_appends;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the compacted records to a temp file next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, records: &[T]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
        self.pending_len = 0;
        // The file now mirrors in-memory state again.
        self.poisoned = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[T]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the log, returning every valid record up to the first bad frame.
    pub fn replay(path: &Path) -> io::Result<Vec<T>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), "discarding corrupt journal tail");
                break;
            }

            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CatalogEvent, User};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentlog_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn user_event(name: &str) -> CatalogEvent {
        CatalogEvent::UserRegistered(User {
            id: Ulid::new(),
            name: name.into(),
            email: format!("{name}@example.com"),
            qualified: true,
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let records = vec![user_event("ana"), CatalogEvent::CarRemoved { id: Ulid::new() }];
        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, records);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_discards_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let record = user_event("bruno");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![record]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_unflushed_records() {
        let path = tmp_path("rollback.wal");
        let _ = fs::remove_file(&path);

        let kept = user_event("edu");
        let lost = user_event("fabi");
        let after = user_event("gil");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            wal.append_buffered(&lost).unwrap();
            wal.append_buffered(&lost).unwrap();
            wal.rollback().unwrap();
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&after).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![kept, after]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_after_reopen_keeps_existing_records() {
        let path = tmp_path("rollback_reopen.wal");
        let _ = fs::remove_file(&path);

        let first = user_event("hugo");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut wal = Wal::<CatalogEvent>::open(&path).unwrap();
            wal.append_buffered(&user_event("ines")).unwrap();
            wal.flush_sync().unwrap();
            wal.append_buffered(&user_event("joao")).unwrap();
            wal.rollback().unwrap();
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![first, user_event("ines")]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let _ = fs::remove_file(&path);
        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let _ = fs::remove_file(&path);

        {
            let payload = bincode::serialize(&user_event("carla")).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let _ = fs::remove_file(&path);

        let keep = user_event("dora");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keep).unwrap();
        for i in 0..10 {
            let churn = user_event(&format!("tmp{i}"));
            wal.append(&churn).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&keep)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should be smaller: {after} < {before}");

        let late = CatalogEvent::UserRemoved { id: Ulid::new() };
        wal.append(&late).unwrap();
        drop(wal);

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![keep, late]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered.wal");
        let _ = fs::remove_file(&path);

        let records: Vec<CatalogEvent> = (0..5).map(|i| user_event(&format!("u{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append_buffered(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        let replayed: Vec<CatalogEvent> = Wal::replay(&path).unwrap();
        assert_eq!(replayed, records);

        let _ = fs::remove_file(&path);
    }
}
