//! # Process Limits

/// Capacity of the process table.
pub const MAX_PROCESSES: usize = 256;

/// File-descriptor slots per process.
pub const MAX_OPEN_FILES: usize = 64;

/// Number of signals; signal numbers are `1..MAX_SIGNALS`.
pub const MAX_SIGNALS: usize = 32;

/// Longest stored process name in bytes. Longer names are truncated.
pub const MAX_PROCESS_NAME: usize = 32;

/// Longest path accepted by exec, including the terminating NUL.
pub const MAX_PATH_LEN: usize = 256;

/// The well-known init process that adopts orphans.
pub const INIT_PID: u32 = 1;

/// Priority assigned to processes created without an explicit one.
pub const DEFAULT_PRIORITY: u8 = 10;

/// Highest (least urgent) priority value.
pub const MAX_PRIORITY: u8 = 31;

/// How often the zombie sweep runs.
pub const ZOMBIE_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Orphan zombies older than this are reaped by the sweep.
pub const ZOMBIE_MAX_AGE_MS: u64 = 30_000;

const _: () = {
    assert!(MAX_PROCESSES > INIT_PID as usize);
    assert!(MAX_SIGNALS <= 64);
    assert!(DEFAULT_PRIORITY <= MAX_PRIORITY);
    assert!(ZOMBIE_SWEEP_INTERVAL_MS <= ZOMBIE_MAX_AGE_MS);
    assert!(MAX_PROCESS_NAME > 0);
};
