use kernel_process::Context;

/// Registers saved by the `int 0x80` entry stub.
///
/// The stub pushes `r15` down to `rax` below the interrupt return frame the
/// CPU pushed, then passes the stack pointer as `&mut TrapFrame`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct TrapFrame {
    // Pushed by the entry stub:
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
    // Pushed by the CPU on interrupt gate entry:
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Syscall number.
    #[inline]
    #[must_use]
    pub const fn sysno(&self) -> u64 {
        self.rax
    }

    /// Argument `n` in SysV syscall order: `rdi, rsi, rdx, r10, r8, r9`.
    #[must_use]
    pub const fn arg(&self, n: usize) -> u64 {
        match n {
            0 => self.rdi,
            1 => self.rsi,
            2 => self.rdx,
            3 => self.r10,
            4 => self.r8,
            5 => self.r9,
            _ => 0,
        }
    }

    #[inline]
    pub const fn set_return(&mut self, value: i64) {
        self.rax = value.cast_unsigned();
    }
}

impl From<&TrapFrame> for Context {
    fn from(f: &TrapFrame) -> Self {
        Self {
            rax: f.rax,
            rbx: f.rbx,
            rcx: f.rcx,
            rdx: f.rdx,
            rsi: f.rsi,
            rdi: f.rdi,
            rbp: f.rbp,
            r8: f.r8,
            r9: f.r9,
            r10: f.r10,
            r11: f.r11,
            r12: f.r12,
            r13: f.r13,
            r14: f.r14,
            r15: f.r15,
            rip: f.rip,
            cs: f.cs,
            rflags: f.rflags,
            rsp: f.rsp,
            ss: f.ss,
        }
    }
}

impl From<Context> for TrapFrame {
    fn from(c: Context) -> Self {
        Self {
            rax: c.rax,
            rbx: c.rbx,
            rcx: c.rcx,
            rdx: c.rdx,
            rsi: c.rsi,
            rdi: c.rdi,
            rbp: c.rbp,
            r8: c.r8,
            r9: c.r9,
            r10: c.r10,
            r11: c.r11,
            r12: c.r12,
            r13: c.r13,
            r14: c.r14,
            r15: c.r15,
            rip: c.rip,
            cs: c.cs,
            rflags: c.rflags,
            rsp: c.rsp,
            ss: c.ss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::VirtualAddress;

    #[test]
    fn layout_matches_push_order() {
        assert_eq!(size_of::<TrapFrame>(), 20 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, rip), 15 * 8);
        assert_eq!(core::mem::offset_of!(TrapFrame, ss), 19 * 8);
    }

    #[test]
    fn context_round_trip_keeps_return_value() {
        let mut ctx = Context::user_entry(VirtualAddress::new(0x40_0000), VirtualAddress::new(0x7000));
        ctx.set_return(5);
        let mut frame = TrapFrame::from(ctx);
        assert_eq!(frame.rip, 0x40_0000);
        frame.set_return(-38);
        assert_eq!(Context::from(&frame).rax as i64, -38);
    }
}
