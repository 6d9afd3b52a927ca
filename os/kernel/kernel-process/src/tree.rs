//! Parent / child / zombie list maintenance on slot indices.

use crate::process::SlotId;
use crate::table::TableState;
use alloc::vec::Vec;
use log::debug;

/// Walks one intrusive list starting at `first`.
pub(crate) struct ListIter<'a> {
    state: &'a TableState,
    next: Option<SlotId>,
    zombies: bool,
}

impl Iterator for ListIter<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let slot = self.next?;
        let links = self.state.get(slot)?.links;
        self.next = if self.zombies {
            links.next_zombie
        } else {
            links.next_sibling
        };
        Some(slot)
    }
}

/// `Some(None)` if `target` heads the list, `Some(Some(prev))` if it follows
/// `prev`, `None` if it is not on the list.
fn predecessor(list: ListIter<'_>, target: SlotId) -> Option<Option<SlotId>> {
    let mut prev = None;
    for slot in list {
        if slot == target {
            return Some(prev);
        }
        prev = Some(slot);
    }
    None
}

impl TableState {
    pub(crate) fn children_of(&self, slot: SlotId) -> ListIter<'_> {
        ListIter {
            state: self,
            next: self.get(slot).and_then(|p| p.links.first_child),
            zombies: false,
        }
    }

    pub(crate) fn zombies_of(&self, slot: SlotId) -> ListIter<'_> {
        ListIter {
            state: self,
            next: self.get(slot).and_then(|p| p.links.first_zombie),
            zombies: true,
        }
    }

    /// Push `child` onto the front of `parent`'s child list.
    pub(crate) fn link_child(&mut self, parent: SlotId, child: SlotId) {
        let head = self.get(parent).and_then(|p| p.links.first_child);
        if let Some(c) = self.get_mut(child) {
            c.links.parent = Some(parent);
            c.links.next_sibling = head;
        }
        if let Some(p) = self.get_mut(parent) {
            p.links.first_child = Some(child);
        }
    }

    /// Remove `child` from its parent's child list. The parent link stays.
    pub(crate) fn unlink_child(&mut self, child: SlotId) {
        let Some(c) = self.get(child) else { return };
        let (parent, after) = (c.links.parent, c.links.next_sibling);
        let Some(parent) = parent else { return };
        match predecessor(self.children_of(parent), child) {
            Some(None) => {
                if let Some(p) = self.get_mut(parent) {
                    p.links.first_child = after;
                }
            }
            Some(Some(prev)) => {
                if let Some(p) = self.get_mut(prev) {
                    p.links.next_sibling = after;
                }
            }
            None => return,
        }
        if let Some(c) = self.get_mut(child) {
            c.links.next_sibling = None;
        }
    }

    /// Push `zombie` onto the front of `parent`'s zombie list.
    pub(crate) fn push_zombie(&mut self, parent: SlotId, zombie: SlotId) {
        let head = self.get(parent).and_then(|p| p.links.first_zombie);
        if let Some(z) = self.get_mut(zombie) {
            z.links.parent = Some(parent);
            z.links.next_zombie = head;
        }
        if let Some(p) = self.get_mut(parent) {
            p.links.first_zombie = Some(zombie);
        }
    }

    /// Remove `zombie` from its parent's zombie list and forget the parent.
    pub(crate) fn remove_zombie(&mut self, zombie: SlotId) {
        let Some(z) = self.get(zombie) else { return };
        let (parent, after) = (z.links.parent, z.links.next_zombie);
        if let Some(parent) = parent {
            match predecessor(self.zombies_of(parent), zombie) {
                Some(None) => {
                    if let Some(p) = self.get_mut(parent) {
                        p.links.first_zombie = after;
                    }
                }
                Some(Some(prev)) => {
                    if let Some(p) = self.get_mut(prev) {
                        p.links.next_zombie = after;
                    }
                }
                None => {}
            }
        }
        if let Some(z) = self.get_mut(zombie) {
            z.links.parent = None;
            z.links.next_zombie = None;
        }
    }

    /// Slot of init, if it exists and has not exited.
    pub(crate) fn init_slot(&self) -> Option<SlotId> {
        self.live_slot(crate::Pid::INIT).ok()
    }

    /// Link a parentless process under init.
    pub(crate) fn adopt_by_init(&mut self, slot: SlotId) {
        if let Some(init) = self.init_slot()
            && init != slot
        {
            self.link_child(init, slot);
        }
    }

    /// Hand every child and zombie of `slot` to init (or orphan them if
    /// there is no init). Returns how many processes changed parent.
    pub(crate) fn reparent_children(&mut self, slot: SlotId) -> usize {
        let init = self.init_slot().filter(|i| *i != slot);
        let children: Vec<SlotId> = self.children_of(slot).collect();
        let zombies: Vec<SlotId> = self.zombies_of(slot).collect();
        if let Some(p) = self.get_mut(slot) {
            p.links.first_child = None;
            p.links.first_zombie = None;
        }

        for child in &children {
            if let Some(c) = self.get_mut(*child) {
                c.links.parent = None;
                c.links.next_sibling = None;
            }
            if let Some(init) = init {
                self.link_child(init, *child);
            }
        }
        for zombie in &zombies {
            if let Some(z) = self.get_mut(*zombie) {
                z.links.parent = None;
                z.links.next_zombie = None;
            }
            if let Some(init) = init {
                self.push_zombie(init, *zombie);
            }
        }

        let moved = children.len() + zombies.len();
        if moved > 0 {
            debug!(
                "reparented {moved} processes to {}",
                if init.is_some() { "init" } else { "nobody" }
            );
        }
        moved
    }
}
