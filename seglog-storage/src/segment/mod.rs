use std::{fs, path::Path};

use bytes::Bytes;
use seglog_core::common::error::{Error, Result};

use crate::config::SegmentConfig;

use self::{
    index::Index,
    store::{Store, LEN_WIDTH},
};

pub mod index;
pub mod store;

pub const STORE_FILE_EXTENSION: &str = "store";
pub const INDEX_FILE_EXTENSION: &str = "index";

pub fn gen_segment_file_name(base_offset: u64, ext: &str) -> String {
    format!("{:0>20}.{}", base_offset, ext)
}

/// One store file plus its index, holding the records with offsets
/// `base_offset..next_offset`. Deciding when to roll to a new segment is left
/// to the caller, see `is_maxed`.
#[derive(Debug)]
pub struct Segment {
    base_offset: u64,
    next_offset: u64,
    store: Store,
    index: Index,
    config: SegmentConfig,
}

impl Segment {
    /// Opens or creates the segment starting at `base_offset` in `dir`.
    ///
    /// Index entries whose frames never reached the store are dropped, store
    /// frames missing from the index are indexed again, and a torn frame at
    /// the end of the store is cut off.
    pub fn new<P: AsRef<Path>>(dir: P, base_offset: u64, config: SegmentConfig) -> Result<Self> {
        config.validate()?;

        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|error| {
            Error::new_io(
                Some(error.into()),
                Some(format!("create segment dir {} is failed", dir.display())),
            )
        })?;

        let store = Store::new(dir.join(gen_segment_file_name(base_offset, STORE_FILE_EXTENSION)))?;
        let mut index = Index::new(
            dir.join(gen_segment_file_name(base_offset, INDEX_FILE_EXTENSION)),
            config.max_index_bytes,
        )?;

        recover(&store, &mut index)?;

        let next_offset = base_offset + index.entries();

        log::debug!(target: "seglog::segment",
            "open segment {} in {}, next offset {}",
            base_offset, dir.display(), next_offset
        );

        Ok(Segment {
            base_offset,
            next_offset,
            store,
            index,
            config,
        })
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn store_path(&self) -> &Path {
        self.store.name()
    }

    pub fn index_path(&self) -> &Path {
        self.index.name()
    }

    /// Whether the store reached `max_store_bytes` or the index is full.
    pub fn is_maxed(&self) -> Result<bool> {
        Ok(self.store.size()? >= self.config.max_store_bytes || self.index.is_full())
    }

    /// Appends `payload` and returns its offset.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let relative = u32::try_from(self.next_offset - self.base_offset)
            .map_err(|_| Error::new_capacity("segment has no record number left"))?;

        // checked up front so a full index never leaves an unindexed frame
        if self.index.is_full() {
            Err(Error::new_capacity(&format!(
                "segment {} is full at offset {}",
                self.base_offset, self.next_offset
            )))?
        }

        let (_, position) = self.store.append(payload)?;
        self.index.write(relative, position)?;

        let offset = self.next_offset;
        self.next_offset += 1;

        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> Result<Bytes> {
        if offset < self.base_offset || offset >= self.next_offset {
            Err(Error::new_offset_not_found(offset))?
        }

        let (_, position) = self.index.read((offset - self.base_offset) as i64)?;

        self.store.read(position)
    }

    /// Closes the index and the store, returning the first failure. The
    /// store is closed even when closing the index failed.
    pub fn close(&mut self) -> Result<()> {
        let index_rst = self.index.close();
        let store_rst = self.store.close();

        index_rst.and(store_rst)
    }

    /// Closes the segment and deletes both of its files.
    pub fn remove(mut self) -> Result<()> {
        self.close()?;

        for path in [self.index.name(), self.store.name()] {
            fs::remove_file(path).map_err(|error| {
                Error::new_io(
                    Some(error.into()),
                    Some(format!("remove {} is failed", path.display())),
                )
            })?;
        }

        Ok(())
    }
}

/// End of the complete frame starting at `position`, `None` if the store
/// ends inside it.
fn frame_end(store: &Store, position: u64, store_size: u64) -> Result<Option<u64>> {
    if position.saturating_add(LEN_WIDTH) > store_size {
        return Ok(None);
    }

    let mut length = [0; LEN_WIDTH as usize];
    store.read_at(&mut length, position)?;

    let end = (position + LEN_WIDTH).saturating_add(u64::from_be_bytes(length));

    Ok((end <= store_size).then_some(end))
}

fn recover(store: &Store, index: &mut Index) -> Result<()> {
    let store_size = store.size()?;

    let mut entries = index.entries();
    let mut position = 0;
    while entries > 0 {
        let (_, last_position) = index.read(entries as i64 - 1)?;
        if let Some(end) = frame_end(store, last_position, store_size)? {
            position = end;
            break;
        }
        entries -= 1;
    }

    if entries < index.entries() {
        log::warn!(target: "seglog::segment",
            "index {} points past store {}, drop {} entries",
            index.name().display(), store.name().display(), index.entries() - entries
        );
        index.truncate(entries)?;
    }

    let indexed = index.entries();
    while let Some(end) = frame_end(store, position, store_size)? {
        if index.is_full() {
            log::warn!(target: "seglog::segment",
                "index {} is full, {} store bytes stay unindexed",
                index.name().display(), store_size - position
            );
            return Ok(());
        }

        index.write(index.entries() as u32, position)?;
        position = end;
    }

    if index.entries() > indexed {
        log::warn!(target: "seglog::segment",
            "rebuilt {} index entries from store {}",
            index.entries() - indexed, store.name().display()
        );
    }

    if position < store_size {
        log::warn!(target: "seglog::segment",
            "store {} ends with a torn frame, truncate from {} to {}",
            store.name().display(), store_size, position
        );
        store.truncate(position)?;
    }

    Ok(())
}
