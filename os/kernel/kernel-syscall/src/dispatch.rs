use kernel_ipc::{ShmError, ShmId};
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, trace};
use stdlib::syscall_abi::{NULL_ADDRESS, SYSCALL_ERROR, Sysno};

/// The kernel services reachable from a system call.
///
/// Implementations serialize internally; every method takes `&self` because
/// `yield_now` and `exit` switch away from the calling task and only return
/// once it is resumed.
pub trait SyscallHandler {
    /// Give up the processor.
    fn yield_now(&self);

    /// Mark the caller dead and switch away.
    ///
    /// Returns only if no other task was ready.
    fn exit(&self);

    /// # Errors
    /// Whatever the shared-memory manager reports.
    fn shm_create(&self, size: u32) -> Result<ShmId, ShmError>;

    /// # Errors
    /// Whatever the shared-memory manager reports.
    fn shm_attach(&self, id: u32) -> Result<PhysicalAddress, ShmError>;

    fn shm_detach(&self, addr: PhysicalAddress);

    /// # Errors
    /// Whatever the shared-memory manager reports.
    fn shm_destroy(&self, id: u32) -> Result<(), ShmError>;
}

/// Run system call `number` and return the value for `eax`.
///
/// Only `a1` is consumed by the current call set; `a2` and `a3` are accepted
/// so that the register contract stays fixed.
pub fn dispatch<H: SyscallHandler + ?Sized>(
    handler: &H,
    number: u32,
    a1: u32,
    a2: u32,
    a3: u32,
) -> u32 {
    let Ok(sysno) = Sysno::try_from(number) else {
        debug!("unknown system call {number}");
        return SYSCALL_ERROR;
    };
    trace!("{sysno:?}({a1:#x}, {a2:#x}, {a3:#x})");

    match sysno {
        Sysno::Yield => {
            handler.yield_now();
            0
        }
        Sysno::Exit => {
            handler.exit();
            0
        }
        Sysno::ShmCreate => handler.shm_create(a1).map_or_else(
            |err| {
                debug!("shm_create({a1}) failed: {err}");
                SYSCALL_ERROR
            },
            ShmId::get,
        ),
        Sysno::ShmAttach => handler.shm_attach(a1).map_or_else(
            |err| {
                debug!("shm_attach({a1}) failed: {err}");
                NULL_ADDRESS
            },
            PhysicalAddress::as_u32,
        ),
        Sysno::ShmDetach => {
            handler.shm_detach(PhysicalAddress::new(a1));
            0
        }
        Sysno::ShmDestroy => match handler.shm_destroy(a1) {
            Ok(()) => 0,
            Err(err) => {
                debug!("shm_destroy({a1}) failed: {err}");
                SYSCALL_ERROR
            }
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Yield,
        Exit,
        Create(u32),
        Attach(u32),
        Detach(u32),
        Destroy(u32),
    }

    /// Knows region 1 at 0x0020_0000; everything else fails.
    #[derive(Default)]
    pub struct Mock {
        pub calls: RefCell<Vec<Call>>,
    }

    impl SyscallHandler for Mock {
        fn yield_now(&self) {
            self.calls.borrow_mut().push(Call::Yield);
        }

        fn exit(&self) {
            self.calls.borrow_mut().push(Call::Exit);
        }

        fn shm_create(&self, size: u32) -> Result<ShmId, ShmError> {
            self.calls.borrow_mut().push(Call::Create(size));
            if size == 0 {
                Err(ShmError::ZeroSize)
            } else {
                Ok(ShmId::new(1).unwrap())
            }
        }

        fn shm_attach(&self, id: u32) -> Result<PhysicalAddress, ShmError> {
            self.calls.borrow_mut().push(Call::Attach(id));
            if id == 1 {
                Ok(PhysicalAddress::new(0x0020_0000))
            } else {
                Err(ShmError::UnknownRegion(id))
            }
        }

        fn shm_detach(&self, addr: PhysicalAddress) {
            self.calls.borrow_mut().push(Call::Detach(addr.as_u32()));
        }

        fn shm_destroy(&self, id: u32) -> Result<(), ShmError> {
            self.calls.borrow_mut().push(Call::Destroy(id));
            if id == 1 {
                Ok(())
            } else {
                Err(ShmError::UnknownRegion(id))
            }
        }
    }

    #[test]
    fn scheduling_calls_return_zero() {
        let mock = Mock::default();
        assert_eq!(dispatch(&mock, 0, 0, 0, 0), 0);
        assert_eq!(dispatch(&mock, 1, 0, 0, 0), 0);
        assert_eq!(*mock.calls.borrow(), [Call::Yield, Call::Exit]);
    }

    #[test]
    fn shared_memory_results_use_the_sentinels() {
        let mock = Mock::default();
        assert_eq!(dispatch(&mock, 2, 4096, 0, 0), 1);
        assert_eq!(dispatch(&mock, 2, 0, 0, 0), SYSCALL_ERROR);
        assert_eq!(dispatch(&mock, 3, 1, 0, 0), 0x0020_0000);
        assert_eq!(dispatch(&mock, 3, 9, 0, 0), NULL_ADDRESS);
        assert_eq!(dispatch(&mock, 4, 0x0020_0010, 0, 0), 0);
        assert_eq!(dispatch(&mock, 5, 1, 0, 0), 0);
        assert_eq!(dispatch(&mock, 5, 9, 0, 0), SYSCALL_ERROR);
        assert_eq!(
            *mock.calls.borrow(),
            [
                Call::Create(4096),
                Call::Create(0),
                Call::Attach(1),
                Call::Attach(9),
                Call::Detach(0x0020_0010),
                Call::Destroy(1),
                Call::Destroy(9),
            ]
        );
    }

    #[test]
    fn unknown_numbers_fail_without_calling_the_handler() {
        let mock = Mock::default();
        assert_eq!(dispatch(&mock, 6, 1, 2, 3), SYSCALL_ERROR);
        assert_eq!(dispatch(&mock, u32::MAX, 0, 0, 0), SYSCALL_ERROR);
        assert!(mock.calls.borrow().is_empty());
    }
}
