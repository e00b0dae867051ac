//! Regions whose mode is part of their type.

use std::sync::Arc;

use super::backend::RegionBackend;
use super::mapping::{ReadOnlySharedMemoryMapping, WritableSharedMemoryMapping};
use super::region::SharedMemoryRegion;
use super::transfer::RegionTransfer;
use super::{Mode, RegionGuid};
use crate::error::RegionError;

macro_rules! typed_region {
    ($(#[$meta:meta])* $name:ident, $mode:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name<B: RegionBackend>(SharedMemoryRegion<B>);

        impl<B: RegionBackend> $name<B> {
            /// Wrap an untyped region.
            ///
            /// # Panics
            /// If the region has a different mode.
            pub fn deserialize(region: SharedMemoryRegion<B>) -> Self {
                assert_eq!(
                    region.mode(),
                    $mode,
                    concat!("Wrong mode for ", stringify!($name), ".")
                );
                $name(region)
            }

            /// Adopt a region received from another process.
            pub fn from_transfer(backend: &Arc<B>, transfer: RegionTransfer) -> Result<Self, RegionError> {
                SharedMemoryRegion::from_transfer(backend, transfer).map(Self::deserialize)
            }

            pub fn into_transfer(self) -> RegionTransfer {
                self.0.into_transfer()
            }

            pub fn into_platform_region(self) -> SharedMemoryRegion<B> {
                self.0
            }

            pub fn size(&self) -> usize {
                self.0.size()
            }

            pub fn guid(&self) -> RegionGuid {
                self.0.guid()
            }
        }
    };
}

typed_region!(
    /// A region nobody can write to through a new mapping.
    ReadOnlySharedMemoryRegion,
    Mode::ReadOnly
);
typed_region!(
    /// A region with a single writer that can later hand out read-only copies.
    WritableSharedMemoryRegion,
    Mode::Writable
);
typed_region!(
    /// A writable region that can be duplicated.
    UnsafeSharedMemoryRegion,
    Mode::Unsafe
);

/// A fresh read-only region with the writable mapping used to fill it.
#[derive(Debug)]
pub struct MappedReadOnlyRegion<B: RegionBackend> {
    pub region: ReadOnlySharedMemoryRegion<B>,
    pub mapping: WritableSharedMemoryMapping<B>,
}

impl<B: RegionBackend> ReadOnlySharedMemoryRegion<B> {
    /// Create a region, map it writable and make it read-only. The mapping
    /// stays writable.
    pub fn create(backend: &Arc<B>, size: usize) -> Result<MappedReadOnlyRegion<B>, RegionError> {
        let mut region = SharedMemoryRegion::create(backend, Mode::Writable, size)?;
        let mapping = region.map()?;
        region.convert_to_read_only()?;
        Ok(MappedReadOnlyRegion {
            region: ReadOnlySharedMemoryRegion(region),
            mapping: WritableSharedMemoryMapping::new(mapping),
        })
    }

    pub fn map(&self) -> Result<ReadOnlySharedMemoryMapping<B>, RegionError> {
        self.0.map().map(ReadOnlySharedMemoryMapping::new)
    }

    pub fn map_at(&self, offset: usize, size: usize) -> Result<ReadOnlySharedMemoryMapping<B>, RegionError> {
        self.0
            .map_at(offset, size)
            .map(ReadOnlySharedMemoryMapping::new)
    }

    pub fn duplicate(&self) -> Result<Self, RegionError> {
        self.0.duplicate().map(ReadOnlySharedMemoryRegion)
    }
}

impl<B: RegionBackend> WritableSharedMemoryRegion<B> {
    pub fn create(backend: &Arc<B>, size: usize) -> Result<Self, RegionError> {
        SharedMemoryRegion::create(backend, Mode::Writable, size).map(WritableSharedMemoryRegion)
    }

    pub fn map(&self) -> Result<WritableSharedMemoryMapping<B>, RegionError> {
        self.0.map().map(WritableSharedMemoryMapping::new)
    }

    pub fn map_at(&self, offset: usize, size: usize) -> Result<WritableSharedMemoryMapping<B>, RegionError> {
        self.0
            .map_at(offset, size)
            .map(WritableSharedMemoryMapping::new)
    }

    pub fn convert_to_read_only(self) -> Result<ReadOnlySharedMemoryRegion<B>, RegionError> {
        let mut region = self.0;
        region.convert_to_read_only()?;
        Ok(ReadOnlySharedMemoryRegion(region))
    }

    pub fn convert_to_unsafe(self) -> Result<UnsafeSharedMemoryRegion<B>, RegionError> {
        let mut region = self.0;
        region.convert_to_unsafe()?;
        Ok(UnsafeSharedMemoryRegion(region))
    }
}

impl<B: RegionBackend> UnsafeSharedMemoryRegion<B> {
    pub fn create(backend: &Arc<B>, size: usize) -> Result<Self, RegionError> {
        let mut region = SharedMemoryRegion::create(backend, Mode::Writable, size)?;
        region.convert_to_unsafe()?;
        Ok(UnsafeSharedMemoryRegion(region))
    }

    pub fn map(&self) -> Result<WritableSharedMemoryMapping<B>, RegionError> {
        self.0.map().map(WritableSharedMemoryMapping::new)
    }

    pub fn map_at(&self, offset: usize, size: usize) -> Result<WritableSharedMemoryMapping<B>, RegionError> {
        self.0
            .map_at(offset, size)
            .map(WritableSharedMemoryMapping::new)
    }

    pub fn duplicate(&self) -> Result<Self, RegionError> {
        self.0.duplicate().map(UnsafeSharedMemoryRegion)
    }
}
