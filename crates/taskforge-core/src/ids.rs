//! Monotonic id generator shared between the runtime and the process
//! registry, so subtasks created by a process get ids from the same
//! sequence as tasks created through `CreateTask`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let gen = IdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_eq!(b, a + 1);
    }
}
