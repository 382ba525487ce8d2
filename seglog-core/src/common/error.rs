use std::{error::Error as StdError, fmt};

pub type Result<T> = std::result::Result<T, Error>;
type Cause = Box<dyn StdError + Send + Sync>;

pub struct Error {
    inner: Box<ErrorImpl>,
    description: Option<String>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Indicates that an index has no room left for another entry.
    /// The owner of the segment should roll to a new one.
    CapacityExhausted,

    /// Indicates that the requested record or entry hasn't been written
    EndOfData,

    /// Indicates that a logical offset isn't held by any live record
    OffsetNotFound,

    /// Indicates that the store or index was already closed
    Closed,

    IO,

    /// Indicates an invalid configuration value or config file
    Config,

    General,
}

impl Error {
    pub fn new(kind: Kind, description: Option<String>, cause: Option<Cause>) -> Self {
        Self {
            description,
            inner: Box::new(ErrorImpl { kind, cause }),
        }
    }

    pub fn new_capacity(description: &str) -> Self {
        Error::new(Kind::CapacityExhausted, Some(description.to_owned()), None)
    }

    pub fn new_end_of_data(description: &str) -> Self {
        Error::new(Kind::EndOfData, Some(description.to_owned()), None)
    }

    pub fn new_offset_not_found(offset: u64) -> Self {
        Error::new(
            Kind::OffsetNotFound,
            Some(format!("offset out of range: {offset}")),
            None,
        )
    }

    pub fn new_closed(description: &str) -> Self {
        Error::new(Kind::Closed, Some(description.to_owned()), None)
    }

    pub fn new_io(cause: Option<Cause>, description: Option<String>) -> Self {
        Error::new(Kind::IO, description, cause)
    }

    pub fn new_config(cause: Option<Cause>, description: Option<String>) -> Self {
        Error::new(Kind::Config, description, cause)
    }

    pub fn new_general(description: &str) -> Self {
        Error::new(Kind::General, Some(description.to_owned()), None)
    }

    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self.inner.kind, Kind::CapacityExhausted)
    }

    pub fn is_end_of_data(&self) -> bool {
        matches!(self.inner.kind, Kind::EndOfData)
    }

    pub fn is_offset_not_found(&self) -> bool {
        matches!(self.inner.kind, Kind::OffsetNotFound)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    pub fn get_kind(&self) -> Kind {
        self.inner.kind
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("seglog_core::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        if let Some(ref description) = self.description {
            f.field(description);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(description) = &self.description {
            f.write_str(description)?
        } else {
            write!(f, "{:?}", self.inner.kind)?
        }

        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
