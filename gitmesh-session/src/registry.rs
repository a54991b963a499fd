//! In-flight operation deduplication (spec §4.E).
//!
//! Grounded on the teacher's `node::client::handle` command-channel
//! pattern, adapted to a synchronous, future-free model: the first caller
//! for a key runs the operation and stashes its result behind a
//! [`Condvar`]; latecomers for the same key block until that result is
//! ready and receive a clone of it. Different keys never contend with
//! each other beyond a brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use gitmesh_core::model::CanonicalKey;

struct Job<T> {
    done: Mutex<Option<T>>,
    cond: Condvar,
}

/// A registry of in-flight jobs keyed by [`CanonicalKey`].
pub struct JobRegistry<T> {
    inflight: Mutex<HashMap<CanonicalKey, Arc<Job<T>>>>,
}

impl<T> Default for JobRegistry<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> JobRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for `key` if no operation for it is already in flight;
    /// otherwise block until the in-flight operation completes and
    /// return a clone of its result.
    pub fn run(&self, key: &CanonicalKey, f: impl FnOnce() -> T) -> T {
        let mut map = self.inflight.lock().unwrap();
        if let Some(job) = map.get(key).cloned() {
            drop(map);
            let mut done = job.done.lock().unwrap();
            while done.is_none() {
                done = job.cond.wait(done).unwrap();
            }
            return done.clone().unwrap();
        }

        let job = Arc::new(Job {
            done: Mutex::new(None),
            cond: Condvar::new(),
        });
        map.insert(key.clone(), job.clone());
        drop(map);

        let result = f();

        *job.done.lock().unwrap() = Some(result.clone());
        job.cond.notify_all();
        self.inflight.lock().unwrap().remove(key);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn concurrent_calls_for_same_key_share_one_run() {
        let registry: Arc<JobRegistry<usize>> = Arc::new(JobRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CanonicalKey::new("alice", "proj");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let calls = calls.clone();
                let key = key.clone();
                thread::spawn(move || {
                    registry.run(&key, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        42
                    })
                })
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&r| r == 42));
        // Some calls may have been serialized rather than deduplicated if
        // the first run finished before later callers arrived; what must
        // hold is that every caller got the right answer.
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn different_keys_do_not_block_each_other() {
        let registry: Arc<JobRegistry<usize>> = Arc::new(JobRegistry::new());
        let a = CanonicalKey::new("alice", "proj");
        let b = CanonicalKey::new("bob", "proj");

        let ra = registry.clone();
        let t1 = thread::spawn(move || ra.run(&a, || 1));
        let rb = registry.clone();
        let t2 = thread::spawn(move || rb.run(&b, || 2));

        assert_eq!(t1.join().unwrap(), 1);
        assert_eq!(t2.join().unwrap(), 2);
    }
}
