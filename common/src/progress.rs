use tracing::{event, instrument, Level};

#[derive(Debug)]
pub struct TlsCounter {
    // mutex is used primarily from one thread, so it's not a bottleneck
    count: thread_local::ThreadLocal<std::sync::Mutex<u64>>,
}

impl TlsCounter {
    pub fn new() -> Self {
        Self {
            count: thread_local::ThreadLocal::new(),
        }
    }

    pub fn add(&self, value: u64) {
        let mutex = self.count.get_or(|| std::sync::Mutex::new(0));
        let mut guard = mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += value;
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.iter().fold(0, |x, y| {
            x + *y.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        })
    }
}

impl Default for TlsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts operations started and finished; the difference is the number in flight.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

pub struct ProgressGuard<'a> {
    progress: &'a ProgressCounter,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(progress: &'a ProgressCounter) -> Self {
        progress.started.inc();
        Self { progress }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.progress.finished.inc();
    }
}

pub struct Status {
    pub started: u64,
    pub finished: u64,
}

impl ProgressCounter {
    pub fn guard(&self) -> ProgressGuard<'_> {
        ProgressGuard::new(self)
    }

    #[instrument]
    pub fn get(&self) -> Status {
        let mut status = Status {
            started: self.started.get(),
            finished: self.finished.get(),
        };
        if status.finished > status.started {
            event!(
                Level::DEBUG,
                "Progress inversion - started: {}, finished {}",
                status.started,
                status.finished
            );
            status.started = status.finished;
        }
        status
    }
}

/// Counters shared by all phases of one batch.
#[derive(Debug)]
pub struct Progress {
    pub ops: ProgressCounter,
    pub directories_listed: TlsCounter,
    pub torrents_read: TlsCounter,
    pub files_skipped: TlsCounter,
    pub probes: TlsCounter,
    pub matches_found: TlsCounter,
    pub directories_created: TlsCounter,
    pub directories_unchanged: TlsCounter,
    pub files_copied: TlsCounter,
    pub files_unchanged: TlsCounter,
    pub symlinks_created: TlsCounter,
    pub bytes_copied: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            ops: Default::default(),
            directories_listed: Default::default(),
            torrents_read: Default::default(),
            files_skipped: Default::default(),
            probes: Default::default(),
            matches_found: Default::default(),
            directories_created: Default::default(),
            directories_unchanged: Default::default(),
            files_copied: Default::default(),
            files_unchanged: Default::default(),
            symlinks_created: Default::default(),
            bytes_copied: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> Snapshot {
        let ops = self.ops.get();
        Snapshot {
            ops_pending: ops.started - ops.finished,
            directories_listed: self.directories_listed.get(),
            torrents_read: self.torrents_read.get(),
            files_skipped: self.files_skipped.get(),
            probes: self.probes.get(),
            matches_found: self.matches_found.get(),
            directories_created: self.directories_created.get(),
            directories_unchanged: self.directories_unchanged.get(),
            files_copied: self.files_copied.get(),
            files_unchanged: self.files_unchanged.get(),
            symlinks_created: self.symlinks_created.get(),
            bytes_copied: self.bytes_copied.get(),
            duration: self.get_duration(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the `Progress` counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct Snapshot {
    pub ops_pending: u64,
    pub directories_listed: u64,
    pub torrents_read: u64,
    pub files_skipped: u64,
    pub probes: u64,
    pub matches_found: u64,
    pub directories_created: u64,
    pub directories_unchanged: u64,
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub symlinks_created: u64,
    pub bytes_copied: u64,
    pub duration: std::time::Duration,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "directories listed: {}\n\
            torrents read: {}\n\
            files skipped: {}\n\
            existence probes: {}\n\
            matches found: {}\n\
            directories created: {}\n\
            directories unchanged: {}\n\
            files copied: {}\n\
            files unchanged: {}\n\
            symlinks created: {}\n\
            bytes copied: {}\n\
            walltime: {:.2?}",
            self.directories_listed,
            self.torrents_read,
            self.files_skipped,
            self.probes,
            self.matches_found,
            self.directories_created,
            self.directories_unchanged,
            self.files_copied,
            self.files_unchanged,
            self.symlinks_created,
            bytesize::ByteSize(self.bytes_copied),
            self.duration,
        )
    }
}
