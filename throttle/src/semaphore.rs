use std::sync::atomic::{AtomicBool, Ordering};

/// A tokio semaphore that can be switched off entirely.
///
/// While disabled (the default, or after `setup(0)`) every acquire returns immediately.
pub struct Semaphore {
    enabled: AtomicBool,
    sem: tokio::sync::Semaphore,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    pub fn setup(&self, permits: usize) {
        self.enabled.store(permits > 0, Ordering::Release);
        if permits == 0 {
            return;
        }
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(permits);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub async fn acquire(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        if !self.is_enabled() {
            return None;
        }
        // the semaphore is owned by a static and never closed
        Some(
            self.sem
                .acquire()
                .await
                .expect("throttle semaphore must never be closed"),
        )
    }

    pub async fn consume(&self) {
        if let Some(permit) = self.acquire().await {
            permit.forget();
        }
    }

    pub async fn run_replenish_thread(&self, replenish: usize, interval: std::time::Duration) {
        if !self.is_enabled() {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            let available = self.sem.available_permits();
            if available < replenish {
                self.sem.add_permits(replenish - available);
            }
        }
    }
}
