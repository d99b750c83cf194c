//! Worker and item identifier types

use core::fmt;

/// Unique identifier for an item bound to a worker
///
/// Ids are process-unique and monotonic, allocated by the I/O system from
/// a shared counter. The maximum value (u64::MAX) is reserved as a sentinel
/// for "no item" and doubles as the worker's waker token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ItemId(u64);

impl ItemId {
    /// Sentinel value indicating no item
    pub const NONE: ItemId = ItemId(u64::MAX);

    /// Create a new ItemId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        ItemId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Get as usize for use as a selector token
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid item id
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }
}

impl From<u64> for ItemId {
    #[inline]
    fn from(id: u64) -> Self {
        ItemId(id)
    }
}

impl From<ItemId> for u64 {
    #[inline]
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ItemId(NONE)")
        } else {
            write!(f, "ItemId({})", self.0)
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for ItemId {
    fn default() -> Self {
        ItemId::NONE
    }
}

/// Identifier for a worker within the I/O system
///
/// Small integer assigned at system startup; also used for thread naming.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct WorkerId(u16);

impl WorkerId {
    /// Create a new WorkerId
    #[inline]
    pub const fn new(id: u16) -> Self {
        WorkerId(id)
    }

    /// Get the raw u16 value
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a registered server
///
/// Allocated by the I/O system when a server handle is created; shared by
/// every worker the server is registered on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ServerId(u64);

impl ServerId {
    /// Create a new ServerId
    #[inline]
    pub const fn new(id: u64) -> Self {
        ServerId(id)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
