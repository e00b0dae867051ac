//! Error types.

use thiserror::Error;

use crate::mem::VirtualAddress;
use crate::shmem::transfer::TransferError;

/// A failed call into the memory primitives, carrying the OS return code.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ApiError {
    #[error("access denied")]
    AccessDenied,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("not enough memory")]
    NotEnoughMemory,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid address")]
    InvalidAddress,
    /// A load or store hit a page that is free, decommitted or lacks the
    /// required permission.
    #[error("access violation at {address}")]
    AccessViolation { address: VirtualAddress },
}

impl ApiError {
    /// The numeric return code reported by the OS.
    pub const fn code(&self) -> u32 {
        match self {
            ApiError::AccessDenied => 5,
            ApiError::InvalidHandle => 6,
            ApiError::NotEnoughMemory => 8,
            ApiError::InvalidParameter => 87,
            ApiError::InvalidAddress => 487,
            ApiError::AccessViolation { .. } => 0xC000_0005,
        }
    }
}

/// Why a shared memory region could not be created, adopted or mapped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("region size must not be zero")]
    ZeroSize,
    #[error("region size {0} exceeds the 2G limit")]
    TooLarge(usize),
    #[error("invalid region handle")]
    InvalidHandle,
    #[error("offset {offset} + size {size} exceeds region size {region_size}")]
    OutOfBounds {
        offset: usize,
        size: usize,
        region_size: usize,
    },
    #[error("platform call failed: {0}")]
    Platform(#[from] ApiError),
    #[error("malformed region transfer: {0}")]
    Transfer(#[from] TransferError),
}

pub type Result<T, E = ApiError> = core::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(ApiError::NotEnoughMemory.code(), 8);
        assert_eq!(ApiError::InvalidAddress.code(), 487);
        assert_eq!(
            RegionError::from(ApiError::AccessDenied),
            RegionError::Platform(ApiError::AccessDenied)
        );
    }

    #[test]
    fn messages() {
        let e = RegionError::OutOfBounds {
            offset: 100,
            size: 1,
            region_size: 100,
        };
        assert_eq!(e.to_string(), "offset 100 + size 1 exceeds region size 100");
        let e = ApiError::AccessViolation {
            address: VirtualAddress::new(0x1_0000),
        };
        assert_eq!(e.to_string(), "access violation at VirtualAddress(0x10000)");
    }
}
