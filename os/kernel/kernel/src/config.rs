use kernel_memory_addresses::VirtualAddress;

/// Runtime settings for [`Kernel::boot`](crate::Kernel::boot).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelConfig {
    /// Entry of the idle task (pid 0); no idle task when `None`.
    pub idle_entry: Option<VirtualAddress>,
    /// Code that a user task's first stack switch returns into; it loads
    /// the user data segments and `iret`s through the frame above it.
    pub user_trampoline: VirtualAddress,
}

impl KernelConfig {
    #[must_use]
    pub const fn new(user_trampoline: VirtualAddress) -> Self {
        Self {
            idle_entry: None,
            user_trampoline,
        }
    }

    #[must_use]
    pub const fn with_idle_task(mut self, entry: VirtualAddress) -> Self {
        self.idle_entry = Some(entry);
        self
    }
}
