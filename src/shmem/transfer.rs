//! Wire form of a region passed to another process.
//!
//! Layout, little-endian:
//!
//! | bytes | field                              |
//! |-------|------------------------------------|
//! | 4     | magic, `SHMR`                      |
//! | 8     | platform handle                    |
//! | 1     | mode tag                           |
//! | 8     | logical size                       |
//! | 16    | GUID                               |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Mode, RegionGuid};

const MAGIC: u32 = u32::from_le_bytes(*b"SHMR");

/// Encoded length of a [`RegionTransfer`].
pub const ENCODED_LEN: usize = 4 + 8 + 1 + 8 + 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("bad magic 0x{0:08x}")]
    Magic(u32),
    #[error("unknown mode tag {0}")]
    Mode(u8),
    #[error("size {0} does not fit this platform")]
    Size(u64),
}

/// Everything another process needs to take over a region.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegionTransfer {
    /// The platform handle as an integer.
    pub handle: u64,
    pub mode: Mode,
    pub size: usize,
    pub guid: RegionGuid,
}

impl RegionTransfer {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENCODED_LEN);
        buf.put_u32_le(MAGIC);
        buf.put_u64_le(self.handle);
        buf.put_u8(self.mode.tag());
        buf.put_u64_le(self.size as u64);
        buf.put_slice(&self.guid.to_bytes());
        buf.freeze()
    }

    pub fn decode(mut buf: impl Buf) -> Result<RegionTransfer, TransferError> {
        if buf.remaining() != ENCODED_LEN {
            return Err(TransferError::Length {
                expected: ENCODED_LEN,
                actual: buf.remaining(),
            });
        }

        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(TransferError::Magic(magic));
        }
        let handle = buf.get_u64_le();
        let tag = buf.get_u8();
        let mode = Mode::from_tag(tag).ok_or(TransferError::Mode(tag))?;
        let raw_size = buf.get_u64_le();
        let size = usize::try_from(raw_size).map_err(|_| TransferError::Size(raw_size))?;
        let mut guid = [0; 16];
        buf.copy_to_slice(&mut guid);

        Ok(RegionTransfer {
            handle,
            mode,
            size,
            guid: RegionGuid::from_bytes(guid),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> RegionTransfer {
        RegionTransfer {
            handle: 0x1001_0000,
            mode: Mode::ReadOnly,
            size: 100,
            guid: RegionGuid::new(),
        }
    }

    #[test]
    fn round_trip() {
        let transfer = sample();
        let encoded = transfer.encode();
        assert_eq!(encoded.len(), ENCODED_LEN);
        assert_eq!(&encoded[..4], b"SHMR");
        assert_eq!(RegionTransfer::decode(encoded), Ok(transfer));
    }

    #[test]
    fn rejects_garbage() {
        let encoded = sample().encode();
        assert_eq!(
            RegionTransfer::decode(&encoded[..10]),
            Err(TransferError::Length {
                expected: ENCODED_LEN,
                actual: 10
            })
        );

        let mut bad = encoded.to_vec();
        bad[0] = b'X';
        assert!(matches!(RegionTransfer::decode(&bad[..]), Err(TransferError::Magic(_))));

        let mut bad = encoded.to_vec();
        bad[12] = 7;
        assert_eq!(RegionTransfer::decode(&bad[..]), Err(TransferError::Mode(7)));
    }
}
