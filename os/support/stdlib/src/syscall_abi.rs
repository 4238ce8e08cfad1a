//! # System Call ABI
//!
//! A task traps with `int 0x80`. The opcode goes in `eax`, up to three word
//! arguments in `ebx`, `ecx` and `edx`; the result comes back in `eax`.
//!
//! | `eax` | Call          | `ebx`          | Result                          |
//! |-------|---------------|----------------|---------------------------------|
//! | 0     | `yield`       |                | 0                               |
//! | 1     | `exit`        |                | does not return                 |
//! | 2     | `shm_create`  | size in bytes  | region id, [`SYSCALL_ERROR`]    |
//! | 3     | `shm_attach`  | region id      | physical base, [`NULL_ADDRESS`] |
//! | 4     | `shm_detach`  | address        | 0                               |
//! | 5     | `shm_destroy` | region id      | 0, [`SYSCALL_ERROR`]            |
//!
//! Unknown opcodes return [`SYSCALL_ERROR`].

/// Interrupt vector of the system call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Failure result of calls returning an id or a status.
pub const SYSCALL_ERROR: u32 = u32::MAX;

/// Failure result of calls returning an address.
pub const NULL_ADDRESS: u32 = 0;

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Sysno {
    /// Give up the processor to the next ready task.
    Yield = 0,
    /// Terminate the calling task.
    Exit = 1,
    /// Create a shared-memory region.
    ShmCreate = 2,
    /// Attach a shared-memory region by id.
    ShmAttach = 3,
    /// Detach the region containing an address.
    ShmDetach = 4,
    /// Destroy a shared-memory region by id.
    ShmDestroy = 5,
}

impl Sysno {
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Sysno {
    /// The unrecognized opcode.
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Yield,
            1 => Self::Exit,
            2 => Self::ShmCreate,
            3 => Self::ShmAttach,
            4 => Self::ShmDetach,
            5 => Self::ShmDestroy,
            other => return Err(other),
        })
    }
}

/// `Some(id)` unless `raw` is [`SYSCALL_ERROR`].
#[inline]
#[must_use]
pub const fn decode_id(raw: u32) -> Option<u32> {
    if raw == SYSCALL_ERROR { None } else { Some(raw) }
}

/// `Some(address)` unless `raw` is [`NULL_ADDRESS`].
#[inline]
#[must_use]
pub const fn decode_address(raw: u32) -> Option<u32> {
    if raw == NULL_ADDRESS { None } else { Some(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_u32() {
        for n in 0..=5 {
            let sysno = Sysno::try_from(n).unwrap();
            assert_eq!(sysno.as_u32(), n);
        }
        assert_eq!(Sysno::try_from(6), Err(6));
        assert_eq!(Sysno::try_from(u32::MAX), Err(u32::MAX));
    }

    #[test]
    fn sentinels_decode_to_none() {
        assert_eq!(decode_id(SYSCALL_ERROR), None);
        assert_eq!(decode_id(1), Some(1));
        assert_eq!(decode_address(NULL_ADDRESS), None);
        assert_eq!(decode_address(0x0040_0000), Some(0x0040_0000));
    }
}
