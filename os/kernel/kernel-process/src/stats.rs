/// Lifecycle counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LifecycleStats {
    pub processes_created: u64,
    pub forks: u64,
    pub forks_failed: u64,
    pub execs: u64,
    pub execs_failed: u64,
    pub waits: u64,
    pub waits_failed: u64,
    pub exits: u64,
    pub exits_normal: u64,
    pub exits_killed: u64,
    pub zombies_created: u64,
    pub zombies_reaped: u64,
    pub zombies_force_reaped: u64,
    pub orphans_adopted: u64,
    /// Items released by the cleanup collaborators.
    pub resources_cleaned: u64,
    pub files_closed: u64,
}
