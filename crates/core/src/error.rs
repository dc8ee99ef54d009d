use thiserror::Error;

use crate::patch::address_allocator::UsedRange;

/// Placement validation failures. None of these mutate anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("channel width {0} must be between 1 and 512")]
    InvalidWidth(u16),

    #[error("address {0} must be between 1 and 512")]
    InvalidAddress(u16),

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    #[error(
        "address conflict at channels {start}-{end}: channels {}-{} are in use by patch {}",
        .conflicting.start,
        .conflicting.end,
        .conflicting.patch_id
    )]
    Conflict {
        start: u16,
        end: u16,
        conflicting: UsedRange,
        placed: Vec<u16>,
    },

    #[error("would exceed DMX channel limit (512): cannot place a {width}-channel fixture at address {address}")]
    ExceedsLimit {
        address: u16,
        width: u16,
        placed: Vec<u16>,
    },
}

impl AddressError {
    /// Addresses that were found before the search failed.
    pub fn placed(&self) -> &[u16] {
        match self {
            AddressError::Conflict { placed, .. } | AddressError::ExceedsLimit { placed, .. } => {
                placed
            }
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("{kind} {id} is still used by {count} patch(es)")]
    InUse {
        kind: &'static str,
        id: String,
        count: usize,
    },

    #[error("invalid fixture template: {0}")]
    InvalidTemplate(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Store(StoreError),

    #[error("console is not running")]
    NotRunning,

    #[error("invalid universe configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),

    #[error("module system error: {0}")]
    Module(String),
}

impl From<StoreError> for ConsoleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => ConsoleError::NotFound { kind, id },
            StoreError::Address(e) => ConsoleError::Address(e),
            other => ConsoleError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("missing Art-Net header")]
    BadHeader,

    #[error("unsupported opcode 0x{0:04x}")]
    UnsupportedOpCode(u16),

    #[error("length field {declared} does not match {available} available data bytes")]
    BadLength { declared: usize, available: usize },

    #[error("universe {0} is outside the 15-bit port address range")]
    InvalidUniverse(u16),

    #[error("Art-Net codec: {0}")]
    Protocol(String),
}
