use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use bytes::Bytes;
use seglog_core::common::error::{Error, Result};

/// Width of the big-endian length in front of every frame.
pub const LEN_WIDTH: u64 = 8;

/// Store = [ length(8) + payload(length) .. ]
///
/// Appends go through a write buffer; every read flushes it first, so a
/// record is readable as soon as `append` returns. All operations are
/// serialised behind one lock, so a `Store` can be shared between threads.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    inner: Mutex<Option<StoreFile>>,
}

#[derive(Debug)]
struct StoreFile {
    writer: BufWriter<File>,
    size: u64,
}

impl StoreFile {
    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some("flushing store buffer is failed".to_owned()),
            )
        })
    }

    /// Positions the file cursor for a read. Writes are unaffected because
    /// the file is opened in append mode.
    fn seek(&mut self, position: u64) -> Result<&mut File> {
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(position)).map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some(format!("seek store to {position} is failed")),
            )
        })?;

        Ok(file)
    }
}

impl Store {
    /// Opens or creates the store file. An existing file is reopened with
    /// `size` taken from its length.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|error| {
                Error::new_io(
                    Some(error.into()),
                    Some(format!("open store {} is failed", path.display())),
                )
            })?;

        let size = file
            .metadata()
            .map_err(|error| Error::new_io(Some(error.into()), None))?
            .len();

        log::debug!(target: "seglog::store", "open store {} with size {}", path.display(), size);

        Ok(Store {
            path,
            inner: Mutex::new(Some(StoreFile {
                writer: BufWriter::new(file),
                size,
            })),
        })
    }

    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far, buffered or not.
    pub fn size(&self) -> Result<u64> {
        let mut guard = self.lock()?;
        let store_file = opened(&mut guard)?;

        Ok(store_file.size)
    }

    /// Appends one frame and returns `(bytes_written, position)`, where
    /// `position` is where the frame begins.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let mut guard = self.lock()?;
        let store_file = opened(&mut guard)?;

        let position = store_file.size;
        let length = (payload.len() as u64).to_be_bytes();

        let rst = store_file
            .writer
            .write_all(&length)
            .and_then(|_| store_file.writer.write_all(payload));

        if let Err(error) = rst {
            // part of the frame may sit in the file or the buffer already
            if let Some(StoreFile { writer, size }) = guard.take() {
                match rollback(writer, position) {
                    Ok(writer) => *guard = Some(StoreFile { writer, size }),
                    Err(rollback_error) => log::error!(target: "seglog::store",
                        "drop partial frame at {} in {} is failed, store is unusable: {}",
                        position, self.path.display(), rollback_error
                    ),
                }
            }

            return Err(Error::new_io(
                Some(error.into()),
                Some("writing store buffer is failed".to_owned()),
            ));
        }

        let store_file = opened(&mut guard)?;
        let written = LEN_WIDTH + payload.len() as u64;
        store_file.size += written;

        log::trace!(target: "seglog::store", "append {} bytes at {}", written, position);

        Ok((written, position))
    }

    /// Reads the payload of the frame starting at `position`.
    pub fn read(&self, position: u64) -> Result<Bytes> {
        let mut guard = self.lock()?;
        let store_file = opened(&mut guard)?;
        store_file.flush()?;

        let size = store_file.size;
        if position.saturating_add(LEN_WIDTH) > size {
            Err(Error::new_end_of_data(&format!(
                "no frame at {position}, store size is {size}"
            )))?
        }

        let file = store_file.seek(position)?;

        let mut length = [0; LEN_WIDTH as usize];
        file.read_exact(&mut length)
            .map_err(|error| Error::new_io(Some(error.into()), None))?;
        let length = u64::from_be_bytes(length);

        if (position + LEN_WIDTH).saturating_add(length) > size {
            Err(Error::new_end_of_data(&format!(
                "frame at {position} with length {length} is beyond store size {size}"
            )))?
        }

        let mut payload = vec![0; length as usize];
        file.read_exact(&mut payload)
            .map_err(|error| Error::new_io(Some(error.into()), None))?;

        Ok(payload.into())
    }

    /// Raw read of the store bytes starting at `offset`, without looking at
    /// frames. Returns how many bytes were copied, which is less than
    /// `buf.len()` only at the end of the store.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut guard = self.lock()?;
        let store_file = opened(&mut guard)?;
        store_file.flush()?;

        if buf.is_empty() {
            return Ok(0);
        }

        let size = store_file.size;
        if offset >= size {
            Err(Error::new_end_of_data(&format!(
                "offset {offset} is beyond store size {size}"
            )))?
        }

        let file = store_file.seek(offset)?;

        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => Err(Error::new_io(Some(error.into()), None))?,
            }
        }

        Ok(read)
    }

    /// Cuts the store back to `len` bytes. Used to drop a torn frame left by
    /// a crash.
    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut guard = self.lock()?;
        let store_file = opened(&mut guard)?;
        store_file.flush()?;

        if len > store_file.size {
            Err(Error::new_general(&format!(
                "can't truncate store of size {} up to {}",
                store_file.size, len
            )))?
        }

        store_file.writer.get_ref().set_len(len).map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some(format!("truncate store to {len} is failed")),
            )
        })?;
        store_file.size = len;

        Ok(())
    }

    /// Flushes buffered frames and closes the file. Every later call fails
    /// with `Kind::Closed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        let store_file = guard
            .as_mut()
            .ok_or_else(|| Error::new_closed("store is already closed"))?;

        // a failed flush or sync keeps the store open so close can be retried
        store_file.flush()?;
        store_file.writer.get_ref().sync_all().map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some("sync store file is failed".to_owned()),
            )
        })?;

        let size = store_file.size;
        guard.take();

        log::debug!(target: "seglog::store", "close store {} with size {}", self.path.display(), size);

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<StoreFile>>> {
        self.inner
            .lock()
            .map_err(|_| Error::new_general("store lock is poisoned"))
    }
}

/// Leaves exactly `position` bytes in the file after a failed append: bytes
/// of the failed frame are cut off, and earlier frames still waiting in the
/// buffer are written out.
fn rollback(writer: BufWriter<File>, position: u64) -> std::io::Result<BufWriter<File>> {
    let (mut file, buffered) = writer.into_parts();
    let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());

    let len = file.metadata()?.len();
    if len < position {
        let missing = (position - len) as usize;
        if missing > buffered.len() {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("{missing} bytes before {position} are lost"),
            ));
        }
        file.write_all(&buffered[..missing])?;
    } else if len > position {
        file.set_len(position)?;
    }

    Ok(BufWriter::new(file))
}

fn opened<'a>(guard: &'a mut MutexGuard<'_, Option<StoreFile>>) -> Result<&'a mut StoreFile> {
    guard
        .as_mut()
        .ok_or_else(|| Error::new_closed("store is closed"))
}
