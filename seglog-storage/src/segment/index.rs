use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut};
use memmap::MmapMut;
use seglog_core::common::error::{Error, Result};

pub const RECORD_NUMBER_WIDTH: u64 = 4;
pub const POSITION_WIDTH: u64 = 8;
pub const ENTRY_WIDTH: u64 = RECORD_NUMBER_WIDTH + POSITION_WIDTH;

/// Index = [ record_number(4) + position(8) .. ]
///
/// The backing file is grown to the full capacity and mapped once; the
/// mapping never grows. `close` truncates the file back to the used entries.
///
/// An `Index` has a single writer: `write` and `close` take `&mut self`, and
/// callers sharing one between threads wrap it in their own lock.
#[derive(Debug)]
pub struct Index {
    path: PathBuf,
    size: u64,
    capacity: u64,
    mapped: Option<MappedFile>,
}

#[derive(Debug)]
struct MappedFile {
    file: File,
    cache: MmapMut,
}

impl Index {
    /// Opens or creates the index file and maps `capacity` bytes of it.
    ///
    /// A file shorter than `capacity` was closed cleanly and all of it is
    /// used. A file at full capacity may be left over from a crash, so the
    /// used region ends at the first all-zero entry after entry 0. A lone
    /// all-zero entry 0 can't be told apart from the tail and is not counted.
    pub fn new<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if capacity == 0 || capacity % ENTRY_WIDTH != 0 {
            Err(Error::new_config(
                None,
                Some(format!(
                    "index capacity {capacity} must be a non-zero multiple of {ENTRY_WIDTH}"
                )),
            ))?
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|error| {
                Error::new_io(
                    Some(error.into()),
                    Some(format!("open index {} is failed", path.display())),
                )
            })?;

        let len = file
            .metadata()
            .map_err(|error| Error::new_io(Some(error.into()), None))?
            .len();

        if len > capacity {
            Err(Error::new_config(
                None,
                Some(format!(
                    "index {} holds {len} bytes, more than capacity {capacity}",
                    path.display()
                )),
            ))?
        }

        if len % ENTRY_WIDTH != 0 {
            log::warn!(target: "seglog::index",
                "index {} has a partial entry, drop {} trailing bytes",
                path.display(), len % ENTRY_WIDTH
            );
        }

        file.set_len(capacity).map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some("set file len for memory mapping is failed".to_owned()),
            )
        })?;

        let cache = unsafe {
            MmapMut::map_mut(&file).map_err(|error| {
                Error::new_io(
                    Some(error.into()),
                    Some("mapping memory from file is failed".to_owned()),
                )
            })?
        };

        let size = if len < capacity {
            len - len % ENTRY_WIDTH
        } else {
            let size = used_size(&cache);
            log::debug!(target: "seglog::index",
                "index {} is at full capacity, recovered {} entries",
                path.display(), size / ENTRY_WIDTH
            );
            size
        };

        log::debug!(target: "seglog::index", "open index {} with size {}", path.display(), size);

        Ok(Index {
            path,
            size,
            capacity,
            mapped: Some(MappedFile { file, cache }),
        })
    }

    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Used bytes, always a multiple of `ENTRY_WIDTH`.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn entries(&self) -> u64 {
        self.size / ENTRY_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size + ENTRY_WIDTH > self.capacity
    }
}

impl Index {
    /// Returns `(record_number, position)` of entry `relative`, or of the
    /// last entry when `relative` is `-1`.
    pub fn read(&self, relative: i64) -> Result<(u32, u64)> {
        let mapped = self.opened()?;

        if self.size == 0 {
            Err(Error::new_end_of_data("index is empty"))?
        }

        let ordinal = match relative {
            -1 => self.entries() - 1,
            val if val >= 0 => val as u64,
            val => Err(Error::new_end_of_data(&format!("no index entry {val}")))?,
        };

        let start = ordinal.saturating_mul(ENTRY_WIDTH);
        if start.saturating_add(ENTRY_WIDTH) > self.size {
            Err(Error::new_end_of_data(&format!(
                "no index entry {ordinal}, index holds {}",
                self.entries()
            )))?
        }

        let start = start as usize;
        let mut entry = &mapped.cache[start..start + ENTRY_WIDTH as usize];
        let record_number = entry.get_u32();
        let position = entry.get_u64();

        Ok((record_number, position))
    }

    /// Appends one entry. Fails with `Kind::CapacityExhausted` when the
    /// mapping has no room for it; nothing is written in that case.
    pub fn write(&mut self, record_number: u32, position: u64) -> Result<()> {
        let size = self.size;
        let capacity = self.capacity;
        let mapped = self
            .mapped
            .as_mut()
            .ok_or_else(|| Error::new_closed("index is closed"))?;

        if size + ENTRY_WIDTH > capacity {
            Err(Error::new_capacity(&format!(
                "index {} is full at {} entries",
                self.path.display(),
                size / ENTRY_WIDTH
            )))?
        }

        let start = size as usize;
        let mut entry = &mut mapped.cache[start..start + ENTRY_WIDTH as usize];
        entry.put_u32(record_number);
        entry.put_u64(position);

        self.size += ENTRY_WIDTH;

        Ok(())
    }

    /// Keeps only the first `entries` entries and zeroes the rest, so a later
    /// recovery scan doesn't pick the dropped ones up again.
    pub fn truncate(&mut self, entries: u64) -> Result<()> {
        let size = entries.saturating_mul(ENTRY_WIDTH);
        if size > self.size {
            Err(Error::new_general(&format!(
                "can't truncate index of {} entries up to {entries}",
                self.entries()
            )))?
        }

        let mapped = self
            .mapped
            .as_mut()
            .ok_or_else(|| Error::new_closed("index is closed"))?;
        mapped.cache[size as usize..self.size as usize].fill(0);
        self.size = size;

        Ok(())
    }

    /// Writes the mapped pages back to the file without closing it.
    pub fn flush(&self) -> Result<()> {
        self.opened()?.cache.flush().map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some("flushing index mapping is failed".to_owned()),
            )
        })
    }

    /// Flushes the mapping, syncs the file, then truncates it to the used
    /// entries. The mapping has to reach the file before the truncate.
    pub fn close(&mut self) -> Result<()> {
        let mapped = self.opened()?;

        // a failed flush or sync keeps the index open so close can be retried
        mapped
            .cache
            .flush()
            .and_then(|_| mapped.file.sync_all())
            .map_err(|error| {
                Error::new_io(
                    Some(error.into()),
                    Some("sync index is failed".to_owned()),
                )
            })?;

        let MappedFile { file, cache } = match self.mapped.take() {
            Some(mapped) => mapped,
            None => return Err(Error::new_closed("index is already closed")),
        };
        drop(cache);

        file.set_len(self.size).map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some(format!("truncate index to {} is failed", self.size)),
            )
        })?;

        log::debug!(target: "seglog::index", "close index {} with size {}", self.path.display(), self.size);

        Ok(())
    }

    fn opened(&self) -> Result<&MappedFile> {
        self.mapped
            .as_ref()
            .ok_or_else(|| Error::new_closed("index is closed"))
    }
}

fn used_size(cache: &[u8]) -> u64 {
    let is_zero = |entry: &[u8]| entry.iter().all(|b| *b == 0);

    let mut used = 0;
    for (ordinal, entry) in cache.chunks_exact(ENTRY_WIDTH as usize).enumerate() {
        if ordinal > 0 && is_zero(entry) {
            break;
        }
        used += 1;
    }

    if used == 1 && is_zero(&cache[..ENTRY_WIDTH as usize]) {
        used = 0;
    }

    used * ENTRY_WIDTH
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::PathBuf,
        sync::{Arc, Mutex},
        thread,
    };

    use seglog_core::common::error::Kind;

    use super::{Index, ENTRY_WIDTH};

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("seglog_index_{}_{}", std::process::id(), name));
        fs::remove_file(&path).ok();
        path
    }

    #[test]
    fn test_write_read() {
        let path = temp_path("write_read");
        let mut index = Index::new(&path, 1024 * ENTRY_WIDTH).unwrap();
        assert_eq!(path.as_path(), index.name());

        let entries = [(0, 0), (1, 13), (2, 26), (3, 39)];
        for (record_number, position) in entries {
            index.write(record_number, position).unwrap();
        }

        assert_eq!(4, index.entries());
        for (k, entry) in entries.iter().enumerate() {
            assert_eq!(*entry, index.read(k as i64).unwrap());
        }
        assert_eq!((3, 39), index.read(-1).unwrap());

        assert_eq!(Kind::EndOfData, index.read(4).unwrap_err().get_kind());
        assert_eq!(Kind::EndOfData, index.read(-2).unwrap_err().get_kind());
        assert_eq!(Kind::EndOfData, index.read(i64::MAX).unwrap_err().get_kind());

        index.close().unwrap();
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_read_empty() {
        let path = temp_path("empty");
        let mut index = Index::new(&path, 10 * ENTRY_WIDTH).unwrap();

        assert!(index.read(-1).unwrap_err().is_end_of_data());
        assert!(index.read(0).unwrap_err().is_end_of_data());

        index.close().unwrap();
        assert_eq!(0, fs::metadata(&path).unwrap().len());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_capacity_boundary() {
        let path = temp_path("capacity");
        let mut index = Index::new(&path, 3 * ENTRY_WIDTH).unwrap();

        for i in 0..3 {
            assert!(!index.is_full());
            index.write(i, i as u64 * 10).unwrap();
        }
        assert!(index.is_full());

        let error = index.write(3, 30).unwrap_err();
        assert!(error.is_capacity_exhausted());
        assert!(!error.is_end_of_data());
        assert_eq!(3 * ENTRY_WIDTH, index.size());

        assert_eq!((2, 20), index.read(-1).unwrap());
        assert!(index.read(3).unwrap_err().is_end_of_data());

        index.close().unwrap();
        assert_eq!(3 * ENTRY_WIDTH, fs::metadata(&path).unwrap().len());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_close_truncates_and_reopen() {
        let path = temp_path("close_truncates");
        let capacity = 1024 * ENTRY_WIDTH;

        let mut index = Index::new(&path, capacity).unwrap();
        assert_eq!(capacity, fs::metadata(&path).unwrap().len());

        index.write(0, 0).unwrap();
        index.write(1, 13).unwrap();
        index.write(2, 26).unwrap();
        index.close().unwrap();
        assert_eq!(3 * ENTRY_WIDTH, fs::metadata(&path).unwrap().len());

        let mut index = Index::new(&path, capacity).unwrap();
        assert_eq!(capacity, fs::metadata(&path).unwrap().len());
        assert_eq!(3, index.entries());
        assert_eq!((0, 0), index.read(0).unwrap());
        assert_eq!((2, 26), index.read(-1).unwrap());

        index.write(3, 39).unwrap();
        index.close().unwrap();
        assert_eq!(4 * ENTRY_WIDTH, fs::metadata(&path).unwrap().len());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_recover_without_close() {
        let path = temp_path("recover");
        let capacity = 16 * ENTRY_WIDTH;

        let mut index = Index::new(&path, capacity).unwrap();
        index.write(0, 0).unwrap();
        index.write(1, 13).unwrap();
        index.write(2, 26).unwrap();
        index.flush().unwrap();
        drop(index);
        assert_eq!(capacity, fs::metadata(&path).unwrap().len());

        let mut index = Index::new(&path, capacity).unwrap();
        assert_eq!(3, index.entries());
        assert_eq!((0, 0), index.read(0).unwrap());
        assert_eq!((2, 26), index.read(-1).unwrap());

        index.close().unwrap();
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_recover_lone_zero_entry() {
        let path = temp_path("lone_zero");
        let capacity = 4 * ENTRY_WIDTH;

        let mut index = Index::new(&path, capacity).unwrap();
        index.write(0, 0).unwrap();
        drop(index);

        let mut index = Index::new(&path, capacity).unwrap();
        assert!(index.is_empty());

        index.close().unwrap();
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_truncate() {
        let path = temp_path("truncate");
        let capacity = 8 * ENTRY_WIDTH;

        let mut index = Index::new(&path, capacity).unwrap();
        for i in 0..4 {
            index.write(i, i as u64 * 13).unwrap();
        }
        assert!(index.truncate(5).is_err());

        index.truncate(2).unwrap();
        assert_eq!((1, 13), index.read(-1).unwrap());
        assert!(index.read(2).unwrap_err().is_end_of_data());
        drop(index);

        // dropped entries were zeroed, recovery stops after entry 1
        let mut index = Index::new(&path, capacity).unwrap();
        assert_eq!(2, index.entries());

        index.close().unwrap();
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_closed() {
        let path = temp_path("closed");
        let mut index = Index::new(&path, 4 * ENTRY_WIDTH).unwrap();
        index.write(0, 0).unwrap();
        index.close().unwrap();

        assert!(index.read(0).unwrap_err().is_closed());
        assert!(index.write(1, 13).unwrap_err().is_closed());
        assert!(index.flush().unwrap_err().is_closed());
        assert!(index.close().unwrap_err().is_closed());

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_invalid_capacity() {
        let path = temp_path("invalid_capacity");

        let rst = Index::new(&path, 100);
        assert_eq!(Kind::Config, rst.unwrap_err().get_kind());

        let rst = Index::new(&path, 0);
        assert_eq!(Kind::Config, rst.unwrap_err().get_kind());

        let mut index = Index::new(&path, 8 * ENTRY_WIDTH).unwrap();
        for i in 0..8 {
            index.write(i, i as u64).unwrap();
        }
        index.close().unwrap();

        // the file holds more than the smaller capacity allows
        let rst = Index::new(&path, 4 * ENTRY_WIDTH);
        assert_eq!(Kind::Config, rst.unwrap_err().get_kind());

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_shared_behind_lock() {
        let path = temp_path("shared");
        let index = Arc::new(Mutex::new(Index::new(&path, 100 * ENTRY_WIDTH).unwrap()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let mut index = index.lock().unwrap();
                        let record_number = index.entries() as u32;
                        index.write(record_number, record_number as u64 * 13).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut index = index.lock().unwrap();
        assert_eq!(100, index.entries());
        for k in 0..100 {
            assert_eq!((k as u32, k * 13), index.read(k as i64).unwrap());
        }
        assert!(index.write(100, 1300).unwrap_err().is_capacity_exhausted());

        index.close().unwrap();
        fs::remove_file(&path).unwrap();
    }
}
