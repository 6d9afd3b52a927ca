//! # User Memory Layout

use kernel_memory_addresses::PAGE_SIZE;

/// Lowest address a user region may start at. Page zero stays unmapped so
/// that null dereferences fault.
pub const USER_SPACE_START: u64 = 0x1000;

/// Conventional load address of user program images.
pub const USER_VIRTUAL_BASE: u64 = 0x40_0000;

/// Where the heap region begins when no image-specific break is known.
pub const USER_HEAP_BASE: u64 = 0x80_0000;

/// Exclusive top of the user stack (the first byte above it).
pub const USER_STACK_TOP: u64 = 0x7FFF_FFFF_F000;

/// Size of the user stack region.
pub const USER_STACK_SIZE: u64 = 8 * 1024 * 1024;

/// Anonymous mappings are placed top-down starting below this address.
pub const USER_MMAP_BASE: u64 = USER_STACK_TOP - 0x4000_0000;

/// End of the canonical lower half; user regions must lie strictly below.
pub const USER_SPACE_END: u64 = 0x8000_0000_0000;

/// Longest single argument or environment string accepted by exec,
/// including its terminating NUL.
pub const MAX_ARG_STRLEN: usize = 4096;

/// Total bytes of argument strings accepted by exec.
pub const MAX_ARGS_SIZE: usize = 64 * 1024;

/// Total bytes of environment strings accepted by exec.
pub const MAX_ENV_SIZE: usize = 64 * 1024;

/// Maximum number of argument or environment pointers read from user memory.
pub const MAX_ARG_COUNT: usize = 1024;

const _: () = {
    assert!(USER_SPACE_START.is_multiple_of(PAGE_SIZE));
    assert!(USER_VIRTUAL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(USER_MMAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USER_SPACE_START < USER_VIRTUAL_BASE);
    assert!(USER_VIRTUAL_BASE < USER_HEAP_BASE);
    assert!(USER_HEAP_BASE < USER_MMAP_BASE);
    assert!(USER_MMAP_BASE < USER_STACK_TOP - USER_STACK_SIZE);
    assert!(USER_STACK_TOP <= USER_SPACE_END);
    assert!(MAX_ARG_STRLEN <= MAX_ARGS_SIZE);
};
