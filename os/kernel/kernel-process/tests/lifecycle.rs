mod common;

use common::{CODE_BASE, DATA_BASE, map_page, read_byte, table, with_space, write_byte};
use kernel_info::signal::{SIGCHLD, SIGKILL, SIGSEGV, SIGTERM};
use kernel_memory_addresses::VirtualAddress;
use kernel_process::{
    Disposition, ExitCause, FdFlags, OpenFile, ProcError, ProcessState, SignalAction, WaitTarget,
};
use kernel_vmem::FrameAlloc;
use kernel_vmm::{FaultResolution, PageFaultError, RegionFlags};

#[test]
fn child_write_after_fork_is_private() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    map_page(&t, init, 0x40_0000);
    write_byte(&t, init, 0x40_0000, 42);

    let child = t.fork(init).unwrap();
    write_byte(&t, child, 0x40_0000, 99);
    assert_eq!(read_byte(&t, init, 0x40_0000), 42);
    assert_eq!(read_byte(&t, child, 0x40_0000), 99);

    let page = VirtualAddress::new(0x40_0000).page();
    let p = with_space(&t, init, |s, m| s.lookup(m, page).unwrap().frame);
    let c = with_space(&t, child, |s, m| s.lookup(m, page).unwrap().frame);
    assert_ne!(p, c);
    with_space(&t, init, |_, m| {
        assert_eq!(m.ref_count(p), 1);
        assert_eq!(m.ref_count(c), 1);
    });
    assert_eq!(t.vm_stats().cow_faults, 1);
    assert_eq!(t.context(child).unwrap().rax, 0);
}

#[test]
fn exit_closes_files_and_wait_reports_code() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.create_process("worker", Some(init), 10).unwrap();
    for path in ["/a", "/b", "/c"] {
        t.install_fd(child, OpenFile::new(path), FdFlags::empty()).unwrap();
    }

    assert_eq!(t.exit(child, 7), Ok(true));
    let info = t.info(child).unwrap();
    assert_eq!(info.state, ProcessState::Zombie);
    assert_eq!(info.open_files, 0);
    assert_eq!(info.mapped_regions, 0);
    assert_eq!(t.info(init).unwrap().zombies, vec![child]);

    let (pid, status) = t.wait(init, WaitTarget::Any, false).unwrap().unwrap();
    assert_eq!(pid, child);
    assert!(status.is_exited());
    assert_eq!(status.exit_code(), 7);
    assert_eq!(t.stats().files_closed, 3);
    assert_eq!(t.state_of(child), None);
}

#[test]
fn nonblocking_wait_without_zombies_returns_none() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    assert_eq!(t.wait(init, WaitTarget::Any, true), Err(ProcError::NoChildren));

    let child = t.create_process("sleeper", Some(init), 10).unwrap();
    assert_eq!(t.wait(init, WaitTarget::Any, true), Ok(None));
    assert_eq!(t.wait(init, WaitTarget::Pid(child), true), Ok(None));
    assert_eq!(t.state_of(init), Some(ProcessState::Ready));
}

#[test]
fn full_table_rejects_creation_unchanged() {
    let t = table(4);
    let init = t.spawn_init().unwrap();
    for i in 0..3 {
        t.create_process(&format!("p{i}"), Some(init), 10).unwrap();
    }
    let before = t.list();
    let frames = t.frame_stats();

    assert_eq!(t.create_process("extra", Some(init), 10), Err(ProcError::TableFull));
    assert_eq!(t.fork(init), Err(ProcError::TableFull));
    assert_eq!(t.list(), before);
    assert_eq!(t.frame_stats(), frames);
    assert_eq!(t.stats().forks_failed, 1);

    // A freed slot is usable again and the next pid continues the sequence.
    let last = before.last().unwrap().pid;
    t.exit(last, 0).unwrap();
    t.wait(init, WaitTarget::Pid(last), false).unwrap();
    let next = t.create_process("again", Some(init), 10).unwrap();
    assert!(next > last);
}

#[test]
fn zombie_is_reaped_exactly_once() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    t.exit(child, 0).unwrap();

    assert!(t.wait(init, WaitTarget::Pid(child), false).unwrap().is_some());
    assert_eq!(t.wait(init, WaitTarget::Pid(child), true), Err(ProcError::NoChildren));
    assert_eq!(t.wait(init, WaitTarget::Any, true), Err(ProcError::NoChildren));
    assert_eq!(t.stats().zombies_reaped, 1);
}

#[test]
fn orphans_go_to_init() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let parent = t.fork(init).unwrap();
    let c1 = t.fork(parent).unwrap();
    let c2 = t.fork(parent).unwrap();
    let z = t.fork(parent).unwrap();
    t.exit(z, 3).unwrap();

    t.exit(parent, 0).unwrap();

    assert_eq!(t.getppid(c1), Ok(Some(init)));
    assert_eq!(t.getppid(c2), Ok(Some(init)));
    let init_info = t.info(init).unwrap();
    assert!(init_info.children.contains(&c1));
    assert!(init_info.children.contains(&c2));
    assert!(init_info.zombies.contains(&z));
    assert!(init_info.zombies.contains(&parent));
    let parent_info = t.info(parent).unwrap();
    assert!(parent_info.children.is_empty());
    assert!(parent_info.zombies.is_empty());
    assert_eq!(t.stats().orphans_adopted, 3);

    let (pid, status) = t.wait(init, WaitTarget::Pid(z), false).unwrap().unwrap();
    assert_eq!((pid, status.exit_code()), (z, 3));
}

#[test]
fn second_exit_changes_nothing() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    assert_eq!(t.exit(child, 1), Ok(true));
    let info = t.info(child);
    let stats = t.stats();
    let frames = t.frame_stats();

    assert_eq!(t.exit(child, 2), Ok(false));
    assert_eq!(t.terminate(child, ExitCause::Signaled(SIGKILL)), Ok(false));
    assert_eq!(t.info(child), info);
    assert_eq!(t.stats(), stats);
    assert_eq!(t.frame_stats(), frames);
}

#[test]
fn all_frames_return_after_reap() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let baseline = t.frame_stats();

    let child = t.fork(init).unwrap();
    map_page(&t, child, 0x40_0000);
    write_byte(&t, child, 0x40_0000, 1);
    let grandchild = t.fork(child).unwrap();
    write_byte(&t, grandchild, 0x40_0000, 2);

    t.exit(grandchild, 0).unwrap();
    t.exit(child, 0).unwrap();
    while let Ok(Some(_)) = t.wait(init, WaitTarget::Any, true) {}
    assert_eq!(t.frame_stats(), baseline);
    assert!(t.info(init).unwrap().zombies.is_empty());
}

#[test]
fn exec_builds_new_image() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    map_page(&t, child, 0x10_0000);
    let keep = t.install_fd(child, OpenFile::new("/dev/tty"), FdFlags::empty()).unwrap();
    let cloexec = t.install_fd(child, OpenFile::new("/tmp/x"), FdFlags::CLOEXEC).unwrap();
    t.set_signal_action(child, SIGTERM, SignalAction::Handler(VirtualAddress::new(0x1000)))
        .unwrap();

    t.exec(child, "prog", b"PROG\x90\xC3", &[b"prog", b"-x"], &[b"TERM=vt100"])
        .unwrap();

    let ctx = t.context(child).unwrap();
    assert_eq!(ctx.rip, CODE_BASE);
    assert_eq!(ctx.rdi, 2);
    let info = t.info(child).unwrap();
    assert_eq!(info.name, "prog");
    assert_eq!(info.open_files, 1);
    assert_eq!(info.mapped_regions, 3);
    assert_eq!(t.close_fd(child, cloexec), Err(ProcError::BadFd(cloexec)));
    assert_eq!(t.close_fd(child, keep), Ok(()));

    with_space(&t, child, |space, mem| {
        assert!(space.find_region(VirtualAddress::new(0x10_0000)).is_none());
        assert!(space.heap_start().as_u64() >= DATA_BASE + 0x2000);
        let argv1 = space.read_user_u64(mem, VirtualAddress::new(ctx.rsi + 8)).unwrap();
        assert_eq!(space.read_user_cstr(mem, VirtualAddress::new(argv1), 16).unwrap(), b"-x");
        assert_eq!(space.read_user_u64(mem, VirtualAddress::new(ctx.rsp)), Ok(2));
        let code = space.read_user_u64(mem, VirtualAddress::new(CODE_BASE)).unwrap();
        assert_eq!(code & 0xFFFF, 0xC390);
    });
    assert_eq!(t.kill(child, SIGTERM), Ok(Disposition::Terminate));
}

#[test]
fn exec_rejections_before_teardown_keep_the_process() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    map_page(&t, child, 0x40_0000);
    write_byte(&t, child, 0x40_0000, 5);

    assert_eq!(t.exec(child, "x", b"garbage", &[], &[]), Err(ProcError::NotExecutable));
    let huge = vec![b'a'; 5000];
    assert_eq!(
        t.exec(child, "x", b"PROG", &[&huge], &[]),
        Err(ProcError::ArgumentsTooLarge)
    );
    assert_eq!(t.exec(child, "", b"PROG", &[], &[]), Err(ProcError::InvalidParam));

    assert_eq!(t.state_of(child), Some(ProcessState::Ready));
    assert_eq!(read_byte(&t, child, 0x40_0000), 5);
    assert_eq!(t.stats().execs_failed, 3);
}

#[test]
fn exec_failure_after_teardown_kills() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();

    assert_eq!(t.exec(child, "bad", b"PROGFAIL", &[], &[]), Err(ProcError::NotExecutable));
    assert_eq!(t.state_of(child), Some(ProcessState::Zombie));
    let (_, status) = t.wait(init, WaitTarget::Pid(child), true).unwrap().unwrap();
    assert_eq!(status.term_signal(), SIGKILL);
}

#[test]
fn page_faults_resolve_or_kill() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    let at = t
        .with_address_space(child, |space, ctx| {
            space
                .map_anonymous(ctx.memory, ctx.tlb, None, 0x2000, RegionFlags::READ | RegionFlags::WRITE)
                .unwrap()
        })
        .unwrap();

    assert_eq!(
        t.handle_page_fault(child, at, PageFaultError::user_write(false)),
        Ok(FaultResolution::Lazy)
    );
    assert_eq!(t.vm_stats().lazy_faults, 1);

    let stray = VirtualAddress::new(0x1234_5000);
    let err = t
        .handle_page_fault(child, stray, PageFaultError::user_read(false))
        .unwrap_err();
    assert!(matches!(err, ProcError::FatalFault(f) if f.address() == stray));
    assert_eq!(t.state_of(child), Some(ProcessState::Zombie));
    assert_eq!(t.info(init).unwrap().exit_status, None);

    let (_, status) = t.wait(init, WaitTarget::Any, true).unwrap().unwrap();
    assert_eq!(status.term_signal(), SIGSEGV);
    assert_eq!(t.stats().exits_killed, 1);
}

#[test]
fn signals_follow_dispositions() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();

    assert_eq!(t.kill(child, 0), Ok(Disposition::Discard));
    assert_eq!(t.kill(child, 99), Err(ProcError::InvalidParam));
    assert_eq!(t.kill(child, SIGCHLD), Ok(Disposition::Discard));
    t.set_signal_action(child, SIGTERM, SignalAction::Ignore).unwrap();
    assert_eq!(t.kill(child, SIGTERM), Ok(Disposition::Discard));
    assert_eq!(
        t.set_signal_action(child, SIGKILL, SignalAction::Ignore),
        Err(ProcError::InvalidParam)
    );
    assert_eq!(t.kill(init, SIGTERM), Err(ProcError::PermissionDenied));

    assert_eq!(t.kill(child, SIGKILL), Ok(Disposition::Terminate));
    assert_eq!(t.kill(child, SIGKILL), Err(ProcError::NotFound(child)));
    let (_, status) = t.wait(init, WaitTarget::Any, true).unwrap().unwrap();
    assert!(status.is_signaled());
    assert_eq!(status.term_signal(), SIGKILL);
}

#[test]
fn sweep_reaps_stale_orphan_zombies() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let child = t.fork(init).unwrap();
    assert_eq!(t.timer_tick(1_000), 0);
    t.exit(child, 0).unwrap();

    assert_eq!(t.timer_tick(5_000), 0);
    assert_eq!(t.state_of(child), Some(ProcessState::Zombie));
    assert_eq!(t.timer_tick(31_000), 1);
    assert_eq!(t.state_of(child), None);
    assert_eq!(t.stats().zombies_force_reaped, 1);
    assert_eq!(t.wait(init, WaitTarget::Any, true), Err(ProcError::NoChildren));
}

#[test]
fn run_next_rotates_ready_processes() {
    let t = table(8);
    let init = t.spawn_init().unwrap();
    let a = t.fork(init).unwrap();

    assert_eq!(t.run_next(), Some(init));
    assert_eq!(t.state_of(init), Some(ProcessState::Running));
    assert_eq!(t.getpid(), Some(init));
    assert_eq!(t.run_next(), Some(a));
    assert_eq!(t.state_of(init), Some(ProcessState::Ready));
    assert_eq!(t.run_next(), Some(init));

    t.exit(a, 0).unwrap();
    assert_eq!(t.run_next(), Some(init));
    assert!(!t.scheduler().contains(a));
}
