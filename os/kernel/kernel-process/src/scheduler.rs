//! # Scheduler Collaborator
//!
//! The lifecycle engine never orders the ready set itself. It reports state
//! changes through [`Scheduler`] and asks it for the next process to run.
//! Queue operations are called with the table lock held;
//! [`yield_to_scheduler`](Scheduler::yield_to_scheduler) is called without it.

use crate::Pid;
use alloc::collections::VecDeque;
use kernel_sync::SpinLock;
use log::trace;

pub trait Scheduler: Sync {
    /// `pid` became runnable.
    fn enqueue_ready(&self, pid: Pid, priority: u8);

    /// `pid` is no longer runnable (exited or blocked).
    fn remove_from_ready(&self, pid: Pid);

    /// Take the next runnable process off the ready set.
    fn pick_next(&self) -> Option<Pid>;

    /// The running process `pid` is about to block.
    fn block_current(&self, pid: Pid) {
        self.remove_from_ready(pid);
    }

    /// Give up the CPU until the scheduler resumes the caller.
    fn yield_to_scheduler(&self);
}

/// Selection rule of a [`ReadyQueue`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SchedulingPolicy {
    /// First in, first out.
    #[default]
    RoundRobin,
    /// Lowest priority value first, FIFO among equals.
    Priority,
}

/// Ready set with a policy chosen at construction.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    policy: SchedulingPolicy,
    queue: SpinLock<VecDeque<(Pid, u8)>>,
}

impl ReadyQueue {
    #[must_use]
    pub const fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            queue: SpinLock::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.queue.lock().iter().any(|(p, _)| *p == pid)
    }
}

impl Scheduler for ReadyQueue {
    fn enqueue_ready(&self, pid: Pid, priority: u8) {
        let mut queue = self.queue.lock();
        if !queue.iter().any(|(p, _)| *p == pid) {
            queue.push_back((pid, priority));
            trace!("ready: {pid} (prio {priority})");
        }
    }

    fn remove_from_ready(&self, pid: Pid) {
        self.queue.lock().retain(|(p, _)| *p != pid);
    }

    fn pick_next(&self) -> Option<Pid> {
        let mut queue = self.queue.lock();
        let index = match self.policy {
            SchedulingPolicy::RoundRobin => 0,
            SchedulingPolicy::Priority => queue
                .iter()
                .enumerate()
                .min_by_key(|(i, (_, prio))| (*prio, *i))
                .map(|(i, _)| i)?,
        };
        queue.remove(index).map(|(pid, _)| pid)
    }

    fn yield_to_scheduler(&self) {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u32) -> Pid {
        Pid::new(n).unwrap()
    }

    #[test]
    fn round_robin_is_fifo_without_duplicates() {
        let q = ReadyQueue::new(SchedulingPolicy::RoundRobin);
        q.enqueue_ready(pid(2), 5);
        q.enqueue_ready(pid(3), 1);
        q.enqueue_ready(pid(2), 5);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pick_next(), Some(pid(2)));
        assert_eq!(q.pick_next(), Some(pid(3)));
        assert_eq!(q.pick_next(), None);
    }

    #[test]
    fn priority_prefers_lowest_value() {
        let q = ReadyQueue::new(SchedulingPolicy::Priority);
        q.enqueue_ready(pid(2), 10);
        q.enqueue_ready(pid(3), 1);
        q.enqueue_ready(pid(4), 1);
        assert_eq!(q.pick_next(), Some(pid(3)));
        assert_eq!(q.pick_next(), Some(pid(4)));
        assert_eq!(q.pick_next(), Some(pid(2)));
    }

    #[test]
    fn blocking_removes_from_ready_set() {
        let q = ReadyQueue::default();
        q.enqueue_ready(pid(2), 10);
        q.block_current(pid(2));
        assert!(!q.contains(pid(2)));
        assert!(q.is_empty());
    }
}
