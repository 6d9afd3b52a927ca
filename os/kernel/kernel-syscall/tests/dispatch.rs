use kernel_alloc::FramePool;
use kernel_info::memory::USER_HEAP_BASE;
use kernel_info::signal::SIGKILL;
use kernel_memory_addresses::VirtualAddress;
use kernel_process::{Pid, ProcessState, ProcessTable, ProcessTableConfig, ReadyQueue};
use kernel_syscall::{Dispatcher, Errno, Outcome, ProgramStore, Sysno, TrapFrame, WaitOptions};
use kernel_vmem::FlushLog;
use std::collections::BTreeMap;

const ENTRY: u64 = 0x40_0000;

/// A static ELF64 image with a single R+X segment holding `jmp $`.
fn hello_elf() -> Vec<u8> {
    let code = [0xEBu8, 0xFE];
    let mut out = vec![0u8; 64];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes());
    out[18..20].copy_from_slice(&62u16.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..32].copy_from_slice(&ENTRY.to_le_bytes());
    out[32..40].copy_from_slice(&64u64.to_le_bytes());
    out[52..54].copy_from_slice(&64u16.to_le_bytes());
    out[54..56].copy_from_slice(&56u16.to_le_bytes());
    out[56..58].copy_from_slice(&1u16.to_le_bytes());

    let mut ph = [0u8; 56];
    ph[0..4].copy_from_slice(&1u32.to_le_bytes());
    ph[4..8].copy_from_slice(&5u32.to_le_bytes());
    ph[8..16].copy_from_slice(&120u64.to_le_bytes());
    ph[16..24].copy_from_slice(&ENTRY.to_le_bytes());
    ph[32..40].copy_from_slice(&2u64.to_le_bytes());
    ph[40..48].copy_from_slice(&2u64.to_le_bytes());
    out.extend_from_slice(&ph);
    out.extend_from_slice(&code);
    out
}

#[derive(Default)]
struct Programs(BTreeMap<String, Vec<u8>>);

impl ProgramStore for Programs {
    fn lookup(&self, path: &str) -> Option<&[u8]> {
        self.0.get(path).map(Vec::as_slice)
    }
}

struct Harness {
    table: ProcessTable<ReadyQueue>,
    programs: Programs,
}

impl Harness {
    fn new() -> Self {
        let mut programs = Programs::default();
        programs.0.insert("/bin/hello".into(), hello_elf());
        Self {
            table: ProcessTable::new(
                ProcessTableConfig::default(),
                FramePool::new(512),
                Box::new(FlushLog::new()),
                ReadyQueue::default(),
            ),
            programs,
        }
    }

    fn call(&self, pid: Pid, nr: u64, args: &[u64]) -> (i64, Outcome, TrapFrame) {
        let mut frame = TrapFrame {
            rax: nr,
            rip: 0x40_1234,
            ..TrapFrame::default()
        };
        let regs = [&mut frame.rdi, &mut frame.rsi, &mut frame.rdx];
        for (reg, value) in regs.into_iter().zip(args) {
            *reg = *value;
        }
        let outcome = Dispatcher::new(&self.table, &self.programs).dispatch(pid, &mut frame);
        (frame.rax.cast_signed(), outcome, frame)
    }

    fn poke(&self, pid: Pid, addr: u64, data: &[u8]) {
        self.table
            .with_address_space(pid, |space, ctx| {
                space
                    .copy_to_user(ctx.memory, ctx.tlb, ctx.stats, VirtualAddress::new(addr), data)
                    .unwrap();
            })
            .unwrap();
    }

    fn peek_u32(&self, pid: Pid, addr: u64) -> u32 {
        self.table
            .with_address_space(pid, |space, ctx| {
                let mut b = [0u8; 4];
                space
                    .copy_from_user(&*ctx.memory, VirtualAddress::new(addr), &mut b)
                    .unwrap();
                u32::from_le_bytes(b)
            })
            .unwrap()
    }

    /// Anonymous read/write scratch page in `pid`.
    fn scratch(&self, pid: Pid) -> u64 {
        let (addr, outcome, _) = self.call(pid, Sysno::Mmap as u64, &[0, 0x1000, 3]);
        assert_eq!(outcome, Outcome::Resume);
        assert!(addr > 0);
        addr.cast_unsigned()
    }
}

#[test]
fn fork_exec_exit_wait_round_trip() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    let page = h.scratch(init);
    h.poke(init, page, b"/bin/hello\0-v\0");
    let argv = page + 0x100;
    let mut vector = Vec::new();
    for ptr in [page, page + 11, 0] {
        vector.extend_from_slice(&u64::to_le_bytes(ptr));
    }
    h.poke(init, argv, &vector);

    let (child, outcome, _) = h.call(init, Sysno::Fork as u64, &[]);
    assert_eq!(outcome, Outcome::Resume);
    let child = Pid::new(u32::try_from(child).unwrap()).unwrap();
    let ctx = h.table.context(child).unwrap();
    assert_eq!((ctx.rax, ctx.rip), (0, 0x40_1234));

    let (_, outcome, frame) = h.call(child, Sysno::Execve as u64, &[page, argv, 0]);
    assert_eq!(outcome, Outcome::Replaced);
    assert_eq!(frame.rip, ENTRY);
    assert_eq!(frame.rdi, 2);
    assert_eq!(h.table.info(child).unwrap().name, "hello");

    let (_, outcome, _) = h.call(child, Sysno::Exit as u64, &[3]);
    assert_eq!(outcome, Outcome::Exited);
    assert_eq!(h.table.state_of(child), Some(ProcessState::Zombie));

    let status = page + 0x200;
    let nohang = u64::from(WaitOptions::WNOHANG.bits());
    let (reaped, _, _) = h.call(init, Sysno::WaitPid as u64, &[u64::MAX, status, nohang]);
    assert_eq!(reaped, i64::from(child.as_u32()));
    assert_eq!(h.peek_u32(init, status), 0x0300);

    let (again, _, _) = h.call(init, Sysno::WaitPid as u64, &[u64::MAX, status, nohang]);
    assert_eq!(again, Errno::ECHILD.as_return());
}

#[test]
fn nonblocking_wait_returns_zero_while_children_run() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    h.call(init, Sysno::Fork as u64, &[]);
    let nohang = u64::from(WaitOptions::WNOHANG.bits());
    assert_eq!(h.call(init, Sysno::WaitPid as u64, &[u64::MAX, 0, nohang]).0, 0);
    assert_eq!(
        h.call(init, Sysno::WaitPid as u64, &[0, 0, nohang]).0,
        Errno::EINVAL.as_return()
    );
    assert_eq!(
        h.call(init, Sysno::WaitPid as u64, &[u64::MAX, 0, 0x100]).0,
        Errno::EINVAL.as_return()
    );
}

#[test]
fn execve_errors_leave_caller_running() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    let page = h.scratch(init);
    h.poke(init, page, b"/bin/missing\0");

    assert_eq!(
        h.call(init, Sysno::Execve as u64, &[page, 0, 0]).0,
        Errno::ENOENT.as_return()
    );
    assert_eq!(
        h.call(init, Sysno::Execve as u64, &[0, 0, 0]).0,
        Errno::EINVAL.as_return()
    );
    assert_eq!(
        h.call(init, Sysno::Execve as u64, &[0x10, 0, 0]).0,
        Errno::EFAULT.as_return()
    );
    assert!(h.table.state_of(init).unwrap().is_alive());
}

#[test]
fn brk_moves_the_break_or_returns_minus_one() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    let base = USER_HEAP_BASE.cast_signed();

    assert_eq!(h.call(init, Sysno::Brk as u64, &[0x2000]).0, base);
    assert_eq!(h.call(init, Sysno::Brk as u64, &[0]).0, base + 0x2000);
    let below = (-0x10_0000i64).cast_unsigned();
    assert_eq!(h.call(init, Sysno::Brk as u64, &[below]).0, -1);
}

#[test]
fn identity_signals_and_unknown_numbers() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    let (child, _, _) = h.call(init, Sysno::Fork as u64, &[]);
    let child_pid = Pid::new(u32::try_from(child).unwrap()).unwrap();

    assert_eq!(h.call(child_pid, Sysno::GetPid as u64, &[]).0, child);
    assert_eq!(h.call(child_pid, Sysno::GetPpid as u64, &[]).0, 1);
    assert_eq!(h.call(init, 999, &[]).0, Errno::ENOSYS.as_return());
    assert_eq!(h.call(init, Sysno::Yield as u64, &[]).1, Outcome::Yield);

    let args = [child.cast_unsigned(), u64::from(SIGKILL)];
    let (_, outcome, _) = h.call(child_pid, Sysno::Kill as u64, &args);
    assert_eq!(outcome, Outcome::Exited);
    assert_eq!(
        h.call(init, Sysno::Kill as u64, &[0, 9]).0,
        Errno::EINVAL.as_return()
    );
}

#[test]
fn mprotect_and_munmap_follow_regions() {
    let h = Harness::new();
    let init = h.table.spawn_init().unwrap();
    let page = h.scratch(init);
    h.poke(init, page, &[1]);

    assert_eq!(h.call(init, Sysno::Mprotect as u64, &[page, 0x1000, 1]).0, 0);
    let err = h
        .table
        .with_address_space(init, |space, ctx| {
            space.copy_to_user(ctx.memory, ctx.tlb, ctx.stats, VirtualAddress::new(page), &[2])
        })
        .unwrap();
    assert!(err.is_err());

    assert_eq!(h.call(init, Sysno::Munmap as u64, &[page, 0x1000]).0, 0);
    assert_eq!(
        h.call(init, Sysno::Mprotect as u64, &[page, 0x1000, 3]).0,
        Errno::ENOMEM.as_return()
    );
    assert_eq!(
        h.call(init, Sysno::Mmap as u64, &[0, 0x1000, 0x80]).0,
        Errno::EINVAL.as_return()
    );
}
