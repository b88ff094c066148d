//! Access to the memory of the process being unwound.

use std::io;

use crate::status::{Error, Result};

/// Reads target memory for the CFI replay.
///
/// Implementations must either fill `buf` completely or fail; a partially
/// filled buffer is never a success.
pub trait MemoryReader {
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Read a little-endian 64-bit word.
    fn read_u64(&mut self, address: u64) -> Result<u64> {
        let mut word = [0; 8];
        self.read(address, &mut word)?;
        Ok(u64::from_le_bytes(word))
    }
}

impl<F> MemoryReader for F
where
    F: FnMut(u64, &mut [u8]) -> Result<()>,
{
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        self(address, buf)
    }
}

/// A copy of a window of the target's stack, taken while it was stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl StackSnapshot {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }
}

impl MemoryReader for StackSnapshot {
    fn read(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = address
            .checked_sub(self.base)
            .and_then(|start| usize::try_from(start).ok())
            .and_then(|start| Some(start..start.checked_add(buf.len())?))
            .and_then(|range| self.bytes.get(range))
            .ok_or_else(|| {
                Error::io(
                    format!("stack snapshot at {:#x}", self.base),
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} bytes at {address:#x} not captured", buf.len()),
                    ),
                )
            })?;
        buf.copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[test]
    fn snapshot_reads_inside_the_window() {
        let mut bytes = vec![0; 0x20];
        bytes[0x18..].copy_from_slice(&0x5000u64.to_le_bytes());
        let mut stack = StackSnapshot::new(0x1000, bytes);

        assert_eq!(stack.read_u64(0x1018).unwrap(), 0x5000);
        assert_eq!(stack.read_u64(0x1000).unwrap(), 0);
    }

    #[test]
    fn snapshot_rejects_partial_reads() {
        let mut stack = StackSnapshot::new(0x1000, vec![0; 0x20]);

        assert_eq!(stack.read_u64(0x0ff8).unwrap_err().status(), Status::Io);
        assert_eq!(stack.read_u64(0x101c).unwrap_err().status(), Status::Io);
        assert_eq!(stack.read_u64(u64::MAX).unwrap_err().status(), Status::Io);
    }

    #[test]
    fn closures_are_readers() {
        let mut calls = 0;
        let mut reader = |address: u64, buf: &mut [u8]| {
            calls += 1;
            buf.copy_from_slice(&address.to_le_bytes()[..buf.len()]);
            Ok::<_, Error>(())
        };
        assert_eq!(reader.read_u64(0xdead_beef).unwrap(), 0xdead_beef);
        assert_eq!(calls, 1);
    }
}
