/// Virtual-memory event counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct VmStats {
    /// Every fault handed to the resolver.
    pub page_faults: u64,
    /// Resolved without copying a frame.
    pub minor_faults: u64,
    /// Resolved by copying a shared frame.
    pub major_faults: u64,
    pub cow_faults: u64,
    pub lazy_faults: u64,
    /// Faults that terminated the process.
    pub fatal_faults: u64,
    pub spurious_faults: u64,
    /// Pages marked copy-on-write by fork.
    pub pages_shared: u64,
}
