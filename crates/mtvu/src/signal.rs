//! Wake signal for the worker thread.
use std::sync::{Condvar, Mutex};

/// A counting semaphore.
#[derive(Debug, Default)]
pub struct Signal {
    count: Mutex<u32>,
    posted: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.posted.notify_one();
    }

    /// Blocks until the signal was posted, then consumes one post.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.posted.wait(count).unwrap();
        }

        *count -= 1;
    }

    /// Posts not consumed yet.
    pub fn count(&self) -> u32 {
        *self.count.lock().unwrap()
    }
}
