//! # Syscall Dispatcher
//!
//! Decodes a [`TrapFrame`], runs the matching lifecycle or memory operation
//! on the calling process and writes the result back into `rax`. Failures
//! are returned as `-errno`; `brk` reports failure with `-1`.

use crate::abi::{Errno, Prot, Sysno, WaitOptions};
use crate::frame::TrapFrame;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_info::memory::{MAX_ARG_COUNT, MAX_ARG_STRLEN};
use kernel_info::process::MAX_PATH_LEN;
use kernel_memory_addresses::VirtualAddress;
use kernel_process::{Context, Pid, ProcError, ProcessState, ProcessTable, Scheduler, WaitTarget};
use kernel_vmm::{RegionFlags, VmmError};
use log::{debug, trace};

/// Resolves executable paths to program images.
pub trait ProgramStore: Send + Sync {
    fn lookup(&self, path: &str) -> Option<&[u8]>;
}

/// What the trap return path must do after a syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Return to the caller; `rax` holds the result.
    Resume,
    /// The frame now holds a fresh program image's entry context.
    Replaced,
    /// The caller gave up the CPU voluntarily.
    Yield,
    /// The caller no longer exists; switch to another process.
    Exited,
}

/// Strings copied in from user memory for `execve`.
struct ExecArgs {
    path: String,
    argv: Vec<Vec<u8>>,
    envp: Vec<Vec<u8>>,
}

/// Syscall entry for one process table.
pub struct Dispatcher<'a, S: Scheduler, P: ProgramStore> {
    table: &'a ProcessTable<S>,
    programs: &'a P,
}

impl<'a, S: Scheduler, P: ProgramStore> Dispatcher<'a, S, P> {
    pub const fn new(table: &'a ProcessTable<S>, programs: &'a P) -> Self {
        Self { table, programs }
    }

    /// Handle the syscall in `frame` on behalf of `pid`.
    pub fn dispatch(&self, pid: Pid, frame: &mut TrapFrame) -> Outcome {
        let sysno = Sysno::try_from(frame.sysno());
        trace!("pid {pid}: syscall {sysno:?}");
        let (result, outcome) = match sysno {
            Ok(Sysno::Fork) => (self.fork(pid, frame), Outcome::Resume),
            Ok(Sysno::Execve) => return self.execve(pid, frame),
            Ok(Sysno::Wait) => (self.waitpid(pid, u64::MAX, frame.arg(0), 0), Outcome::Resume),
            Ok(Sysno::WaitPid) => (
                self.waitpid(pid, frame.arg(0), frame.arg(1), frame.arg(2)),
                Outcome::Resume,
            ),
            Ok(Sysno::Mmap) => (self.mmap(pid, frame.arg(0), frame.arg(1), frame.arg(2)), Outcome::Resume),
            Ok(Sysno::Mprotect) => (
                self.mprotect(pid, frame.arg(0), frame.arg(1), frame.arg(2)),
                Outcome::Resume,
            ),
            Ok(Sysno::Munmap) => (self.munmap(pid, frame.arg(0), frame.arg(1)), Outcome::Resume),
            Ok(Sysno::Brk) => (Ok(self.brk(pid, frame.arg(0).cast_signed())), Outcome::Resume),
            Ok(Sysno::Yield) => (Ok(0), Outcome::Yield),
            Ok(Sysno::GetPid) => (Ok(i64::from(pid.as_u32())), Outcome::Resume),
            Ok(Sysno::GetPpid) => (
                self.table
                    .getppid(pid)
                    .map(|p| p.map_or(0, |p| i64::from(p.as_u32())))
                    .map_err(Errno::from),
                Outcome::Resume,
            ),
            Ok(Sysno::Exit) => {
                #[allow(clippy::cast_possible_truncation)]
                let code = frame.arg(0) as u8;
                // A missing caller has nothing left to do either way.
                let _ = self.table.exit(pid, code);
                return Outcome::Exited;
            }
            Ok(Sysno::Kill) => (self.kill(pid, frame.arg(0), frame.arg(1)), Outcome::Resume),
            Err(e) => (Err(e), Outcome::Resume),
        };

        if !self.is_alive(pid) {
            return Outcome::Exited;
        }
        match result {
            Ok(value) => frame.set_return(value),
            Err(e) => {
                debug!("pid {pid}: syscall {sysno:?} failed: {e}");
                frame.set_return(e.as_return());
            }
        }
        outcome
    }

    fn is_alive(&self, pid: Pid) -> bool {
        self.table.state_of(pid).is_some_and(ProcessState::is_alive)
    }

    fn fork(&self, pid: Pid, frame: &TrapFrame) -> Result<i64, Errno> {
        self.table.save_context(pid, Context::from(frame))?;
        let child = self.table.fork(pid)?;
        Ok(i64::from(child.as_u32()))
    }

    fn execve(&self, pid: Pid, frame: &mut TrapFrame) -> Outcome {
        let result = self
            .read_exec_args(pid, frame.arg(0), frame.arg(1), frame.arg(2))
            .and_then(|args| {
                let image = self.programs.lookup(&args.path).ok_or(Errno::ENOENT)?;
                let name = args.path.rsplit('/').next().unwrap_or(&args.path);
                let argv: Vec<&[u8]> = args.argv.iter().map(Vec::as_slice).collect();
                let envp: Vec<&[u8]> = args.envp.iter().map(Vec::as_slice).collect();
                self.table.exec(pid, name, image, &argv, &envp)?;
                self.table.context(pid).ok_or(Errno::ESRCH)
            });

        match result {
            Ok(context) => {
                *frame = TrapFrame::from(context);
                Outcome::Replaced
            }
            Err(_) if !self.is_alive(pid) => Outcome::Exited,
            Err(e) => {
                debug!("pid {pid}: execve failed: {e}");
                frame.set_return(e.as_return());
                Outcome::Resume
            }
        }
    }

    fn read_exec_args(&self, pid: Pid, path: u64, argv: u64, envp: u64) -> Result<ExecArgs, Errno> {
        if path == 0 {
            return Err(Errno::EINVAL);
        }
        self.table
            .with_address_space(pid, |space, ctx| -> Result<ExecArgs, Errno> {
                let mem = &*ctx.memory;
                let path = space
                    .read_user_cstr(mem, VirtualAddress::new(path), MAX_PATH_LEN)
                    .map_err(|e| match e {
                        VmmError::TooLong(_) => Errno::ENAMETOOLONG,
                        _ => Errno::EFAULT,
                    })?;
                let path = String::from_utf8(path).map_err(|_| Errno::ENOENT)?;

                let read_vector = |base: u64| -> Result<Vec<Vec<u8>>, Errno> {
                    let mut out = Vec::new();
                    if base == 0 {
                        return Ok(out);
                    }
                    let mut at = VirtualAddress::new(base);
                    loop {
                        let ptr = space.read_user_u64(mem, at).map_err(|_| Errno::EFAULT)?;
                        if ptr == 0 {
                            return Ok(out);
                        }
                        if out.len() == MAX_ARG_COUNT {
                            return Err(Errno::E2BIG);
                        }
                        let s = space
                            .read_user_cstr(mem, VirtualAddress::new(ptr), MAX_ARG_STRLEN)
                            .map_err(|e| match e {
                                VmmError::TooLong(_) => Errno::E2BIG,
                                _ => Errno::EFAULT,
                            })?;
                        out.push(s);
                        at = at.checked_add(8).ok_or(Errno::EFAULT)?;
                    }
                };
                Ok(ExecArgs {
                    path,
                    argv: read_vector(argv)?,
                    envp: read_vector(envp)?,
                })
            })
            .map_err(Errno::from)?
    }

    fn waitpid(&self, pid: Pid, target: u64, status: u64, options: u64) -> Result<i64, Errno> {
        let target = match target.cast_signed() {
            -1 => WaitTarget::Any,
            p if p > 0 => {
                let raw = u32::try_from(p).map_err(|_| Errno::EINVAL)?;
                WaitTarget::Pid(Pid::new(raw).ok_or(Errno::EINVAL)?)
            }
            _ => return Err(Errno::EINVAL),
        };
        let options = u32::try_from(options)
            .ok()
            .and_then(WaitOptions::from_bits)
            .ok_or(Errno::EINVAL)?;

        let Some((child, code)) = self
            .table
            .wait(pid, target, options.contains(WaitOptions::WNOHANG))?
        else {
            return Ok(0);
        };
        if status != 0 {
            self.table
                .with_address_space(pid, |space, ctx| {
                    space.copy_to_user(
                        ctx.memory,
                        ctx.tlb,
                        ctx.stats,
                        VirtualAddress::new(status),
                        &code.into_bits().to_le_bytes(),
                    )
                })?
                .map_err(|_| Errno::EFAULT)?;
        }
        Ok(i64::from(child.as_u32()))
    }

    fn mmap(&self, pid: Pid, addr: u64, len: u64, prot: u64) -> Result<i64, Errno> {
        let flags = region_access(prot)?;
        let hint = (addr != 0).then_some(VirtualAddress::new(addr));
        let at = self
            .table
            .with_address_space(pid, |space, ctx| {
                space.map_anonymous(ctx.memory, ctx.tlb, hint, len, flags)
            })?
            .map_err(errno)?;
        Ok(at.as_u64().cast_signed())
    }

    fn mprotect(&self, pid: Pid, addr: u64, len: u64, prot: u64) -> Result<i64, Errno> {
        let flags = region_access(prot)?;
        self.table
            .with_address_space(pid, |space, ctx| {
                space.protect_region(ctx.memory, ctx.tlb, VirtualAddress::new(addr), len, flags)
            })?
            .map_err(errno)?;
        Ok(0)
    }

    fn munmap(&self, pid: Pid, addr: u64, len: u64) -> Result<i64, Errno> {
        self.table
            .with_address_space(pid, |space, ctx| {
                space.unmap_range(ctx.memory, ctx.tlb, VirtualAddress::new(addr), len)
            })?
            .map_err(errno)?;
        Ok(0)
    }

    /// Previous break, or `-1` on any failure.
    fn brk(&self, pid: Pid, delta: i64) -> i64 {
        self.table
            .with_address_space(pid, |space, ctx| space.adjust_heap(ctx.memory, ctx.tlb, delta))
            .ok()
            .and_then(Result::ok)
            .map_or(-1, |old| old.as_u64().cast_signed())
    }

    fn kill(&self, pid: Pid, target: u64, sig: u64) -> Result<i64, Errno> {
        let target = u32::try_from(target)
            .ok()
            .and_then(Pid::new)
            .ok_or(Errno::EINVAL)?;
        let sig = u8::try_from(sig).map_err(|_| Errno::EINVAL)?;
        self.table.kill(target, sig)?;
        if target != pid {
            debug!("pid {pid}: sent signal {sig} to {target}");
        }
        Ok(0)
    }
}

fn region_access(prot: u64) -> Result<RegionFlags, Errno> {
    u32::try_from(prot)
        .ok()
        .and_then(Prot::from_bits)
        .map(RegionFlags::from)
        .ok_or(Errno::EINVAL)
}

fn errno(e: VmmError) -> Errno {
    match e {
        VmmError::OutOfMemory | VmmError::NotFound(_) => Errno::ENOMEM,
        VmmError::PermissionDenied => Errno::EACCES,
        VmmError::BadAddress(_) => Errno::EFAULT,
        other => Errno::from(ProcError::from(other)),
    }
}
