use kernel_memory_addresses::VirtualAddress;

/// User-mode register state saved while a process is not on the CPU.
///
/// Field order follows the general-purpose register save order of the trap
/// entry stub, followed by the interrupt return frame.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct Context {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Context {
    /// Ring-3 code selector (GDT index 4, RPL 3).
    pub const USER_CS: u64 = 0x23;
    /// Ring-3 data selector (GDT index 3, RPL 3).
    pub const USER_SS: u64 = 0x1B;
    /// IF set, reserved bit 1 set.
    pub const USER_RFLAGS: u64 = 0x202;

    /// Fresh user context entering at `entry` with stack pointer `sp`.
    #[must_use]
    pub const fn user_entry(entry: VirtualAddress, sp: VirtualAddress) -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: entry.as_u64(),
            cs: Self::USER_CS,
            rflags: Self::USER_RFLAGS,
            rsp: sp.as_u64(),
            ss: Self::USER_SS,
        }
    }

    /// Copy for a forked child: identical except that `fork` returns 0.
    #[must_use]
    pub const fn for_child(&self) -> Self {
        let mut child = *self;
        child.rax = 0;
        child
    }

    #[inline]
    pub const fn set_return(&mut self, value: u64) {
        self.rax = value;
    }
}
