use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use seglog_core::common::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub value: Vec<u8>,
    pub offset: u64,
}

impl Record {
    pub fn new(value: Vec<u8>) -> Self {
        Record { value, offset: 0 }
    }
}

/// Append-only log kept in memory; a record's offset is its position in the
/// log. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: RwLock<Vec<Record>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }

    /// Stores `record` under the next offset, overwriting its `offset`.
    pub fn append(&self, mut record: Record) -> Result<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|_| Error::new_general("memory log lock is poisoned"))?;

        record.offset = records.len() as u64;
        let offset = record.offset;
        records.push(record);

        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> Result<Record> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::new_general("memory log lock is poisoned"))?;

        usize::try_from(offset)
            .ok()
            .and_then(|i| records.get(i))
            .cloned()
            .ok_or_else(|| Error::new_offset_not_found(offset))
    }

    pub fn len(&self) -> Result<usize> {
        self.records
            .read()
            .map(|records| records.len())
            .map_err(|_| Error::new_general("memory log lock is poisoned"))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use seglog_core::common::error::Kind;

    use super::{MemoryLog, Record};

    #[test]
    fn test_append_read() {
        let log = MemoryLog::new();
        assert!(log.is_empty().unwrap());

        let mut record = Record::new(b"hello".to_vec());
        record.offset = 42;
        assert_eq!(0, log.append(record).unwrap());
        assert_eq!(1, log.append(Record::new(b"world".to_vec())).unwrap());

        let record = log.read(1).unwrap();
        assert_eq!(b"world".to_vec(), record.value);
        assert_eq!(1, record.offset);
        assert_eq!(0, log.read(0).unwrap().offset);

        let error = log.read(2).unwrap_err();
        assert!(error.is_offset_not_found());
        assert_eq!("offset out of range: 2", error.to_string());
    }

    #[test]
    fn test_poisoned_lock() {
        let log = Arc::new(MemoryLog::new());

        let poisoner = log.clone();
        thread::spawn(move || {
            let _records = poisoner.records.write().unwrap();
            panic!("poison the memory log lock");
        })
        .join()
        .unwrap_err();

        assert_eq!(Kind::General, log.len().unwrap_err().get_kind());
        assert_eq!(Kind::General, log.is_empty().unwrap_err().get_kind());
        assert_eq!(Kind::General, log.read(0).unwrap_err().get_kind());
    }

    #[test]
    fn test_record_yaml() {
        let record = Record {
            value: b"hi".to_vec(),
            offset: 3,
        };

        let data = serde_yaml::to_string(&record).unwrap();
        assert!(data.contains("offset: 3"));

        let decoded: Record = serde_yaml::from_str(&data).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_concurrent_append() {
        let log = Arc::new(MemoryLog::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        log.append(Record::new(vec![i])).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(100, log.len().unwrap());
        for offset in 0..100 {
            assert_eq!(offset, log.read(offset).unwrap().offset);
        }
    }
}
