//! # Thread Registry
//!
//! Fixed-capacity table from [`ThreadId`] to TCB, plus the pool of free ids.
//! Ids are handed out smallest-first so reuse order is reproducible. Id 0
//! belongs to the main thread for the whole life of the runtime.

use std::collections::BTreeSet;

use crate::config::MAX_THREADS;
use crate::error::{Error, Result};
use crate::thread::{Thread, ThreadId};

pub struct Registry {
    slots: Vec<Option<Thread>>,
    free: BTreeSet<ThreadId>,
}

impl Registry {
    /// Registry holding only `main` in slot 0; ids `1..MAX_THREADS` free.
    pub fn new(main: Thread) -> Self {
        debug_assert!(main.id().is_main());
        let mut slots: Vec<Option<Thread>> = (0..MAX_THREADS).map(|_| None).collect();
        slots[ThreadId::MAIN.index()] = Some(main);
        let free = (0..MAX_THREADS)
            .map(ThreadId::new)
            .filter(|id| !id.is_main())
            .collect();
        Self { slots, free }
    }

    /// Reserve the smallest free id.
    pub fn allocate_id(&mut self) -> Result<ThreadId> {
        self.free.pop_first().ok_or(Error::Exhausted(MAX_THREADS))
    }

    /// Return an id obtained from `allocate_id` that never got a TCB.
    pub fn restore_id(&mut self, id: ThreadId) {
        debug_assert!(self.slots[id.index()].is_none());
        if !id.is_main() {
            self.free.insert(id);
        }
    }

    /// Occupy the slot of a freshly allocated id.
    pub fn insert(&mut self, thread: Thread) {
        let id = thread.id();
        debug_assert!(!self.free.contains(&id));
        debug_assert!(self.slots[id.index()].is_none());
        self.slots[id.index()] = Some(thread);
    }

    /// True iff `id` is in range and names a live thread.
    pub fn is_valid(&self, id: ThreadId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    pub fn get(&self, id: ThreadId) -> Result<&Thread> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(Error::NoSuchThread(id))
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Result<&mut Thread> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::NoSuchThread(id))
    }

    /// Clear the slot of `id` and return its id to the pool.
    ///
    /// The main thread is never released.
    pub fn release(&mut self, id: ThreadId) -> Option<Thread> {
        if id.is_main() {
            return None;
        }
        let thread = self.slots.get_mut(id.index())?.take()?;
        self.free.insert(id);
        Some(thread)
    }

    /// Ids of every live thread, ascending.
    pub fn ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| ThreadId::new(index))
    }

    /// Number of live threads, main included.
    pub fn len(&self) -> usize {
        MAX_THREADS - self.free.len()
    }

    /// Number of ids still available.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_SIZE;
    use crate::thread::Stack;

    extern "C" fn never_run() {}

    fn spawn_into(registry: &mut Registry) -> ThreadId {
        let id = registry.allocate_id().unwrap();
        let stack = Stack::new(STACK_SIZE).unwrap();
        registry.insert(Thread::spawn(id, 0, Box::new(|| {}), stack, never_run).unwrap());
        id
    }

    #[test]
    fn test_new_registry() {
        let registry = Registry::new(Thread::main());
        assert!(registry.is_valid(ThreadId::MAIN));
        assert!(!registry.is_valid(ThreadId::new(1)));
        assert!(!registry.is_valid(ThreadId::new(MAX_THREADS)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.available(), MAX_THREADS - 1);
    }

    #[test]
    fn test_smallest_id_first() {
        let mut registry = Registry::new(Thread::main());
        let ids: Vec<_> = (0..4).map(|_| spawn_into(&mut registry)).collect();
        assert_eq!(ids, [1, 2, 3, 4].map(ThreadId::new));

        registry.release(ThreadId::new(3)).unwrap();
        registry.release(ThreadId::new(2)).unwrap();
        assert_eq!(spawn_into(&mut registry), ThreadId::new(2));
        assert_eq!(spawn_into(&mut registry), ThreadId::new(3));
        assert_eq!(spawn_into(&mut registry), ThreadId::new(5));
    }

    #[test]
    fn test_exhaustion() {
        let mut registry = Registry::new(Thread::main());
        for _ in 1..MAX_THREADS {
            spawn_into(&mut registry);
        }
        assert_eq!(registry.len(), MAX_THREADS);
        assert!(matches!(registry.allocate_id(), Err(Error::Exhausted(MAX_THREADS))));
    }

    #[test]
    fn test_main_is_never_released() {
        let mut registry = Registry::new(Thread::main());
        assert!(registry.release(ThreadId::MAIN).is_none());
        assert!(registry.is_valid(ThreadId::MAIN));
        assert_eq!(registry.allocate_id().unwrap(), ThreadId::new(1));
    }

    #[test]
    fn test_restore_id() {
        let mut registry = Registry::new(Thread::main());
        let id = registry.allocate_id().unwrap();
        registry.restore_id(id);
        assert_eq!(registry.allocate_id().unwrap(), id);
    }

    #[test]
    fn test_lookup_errors() {
        let mut registry = Registry::new(Thread::main());
        assert!(matches!(
            registry.get(ThreadId::new(99)),
            Err(Error::NoSuchThread(id)) if id == ThreadId::new(99)
        ));
        assert!(registry.get_mut(ThreadId::new(MAX_THREADS + 5)).is_err());
        assert!(registry.release(ThreadId::new(42)).is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), [ThreadId::MAIN]);
    }
}
