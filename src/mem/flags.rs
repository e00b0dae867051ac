//! The flag vocabulary of the memory primitives.

use bitflags::bitflags;

bitflags! {
    /// Attributes of pages, as passed to and reported by the primitives.
    pub struct PageFlags: u32 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const EXECUTE = 0x0004;
        const GUARD = 0x0008;
        /// Back the pages with storage.
        const COMMIT = 0x0010;
        /// Release the storage, keep the reservation.
        const DECOMMIT = 0x0020;
        /// Use the permissions given when the object was allocated.
        const DEFAULT = 0x0400;
        /// Reported for views of a shared object.
        const SHARED = 0x2000;
        /// Reported for addresses no object occupies.
        const FREE = 0x4000;
        /// Reported for the first pages of an object.
        const BASE = 0x0001_0000;

        const PERMISSIONS = Self::READ.bits | Self::WRITE.bits | Self::EXECUTE.bits | Self::GUARD.bits;
    }
}

bitflags! {
    /// Placement and sharing attributes of a new allocation object.
    pub struct AllocFlags: u32 {
        const TILE = 0x0040;
        const GETTABLE = 0x0100;
        const GIVEABLE = 0x0200;
        /// Allocate from high memory.
        const ANY = 0x0400;
        /// Allocate exactly at the given address.
        const LOCATION = 0x0800;
        const SELMAPALL = 0x0800_0000;
    }
}

bitflags! {
    /// Attributes of a shmem handle.
    pub struct ShmemFlags: u32 {
        const READONLY = 0x0001;
    }
}

impl PageFlags {
    /// Only the permission bits.
    #[inline]
    pub fn permissions(self) -> PageFlags {
        self & PageFlags::PERMISSIONS
    }
}

/// The access a caller wants for a range of pages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PageAccessibility {
    Inaccessible,
    Read,
    ReadWrite,
    ReadExecute,
    ReadWriteExecute,
}

impl PageAccessibility {
    pub const ALL: [PageAccessibility; 5] = [
        PageAccessibility::Inaccessible,
        PageAccessibility::Read,
        PageAccessibility::ReadWrite,
        PageAccessibility::ReadExecute,
        PageAccessibility::ReadWriteExecute,
    ];
}

/// Permission bits for an accessibility. Inaccessible maps to no bits at all.
pub fn access_flags(accessibility: PageAccessibility) -> PageFlags {
    match accessibility {
        PageAccessibility::Read => PageFlags::READ,
        PageAccessibility::ReadWrite => PageFlags::READ | PageFlags::WRITE,
        PageAccessibility::ReadExecute => PageFlags::READ | PageFlags::EXECUTE,
        PageAccessibility::ReadWriteExecute => {
            PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE
        }
        PageAccessibility::Inaccessible => PageFlags::empty(),
    }
}
