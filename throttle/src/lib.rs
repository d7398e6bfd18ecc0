//! Resource throttling for the tormatch scan and copy engine
//!
//! Two process-wide limits are provided:
//!
//! 1. **Open files limit** - caps the number of simultaneously open files. Every file read
//!    (torrent parsing), directory listing and file copy holds a permit while its descriptor
//!    is open.
//! 2. **Operations throttle** - a token bucket limiting how many filesystem operations are
//!    issued per second. Tokens are taken before each discovery or copy task is spawned.
//!
//! Both limits are disabled until configured with a value greater than zero.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! throttle::set_max_open_files(1024);
//! // 100 operations per second
//! throttle::init_ops_tokens(10);
//! tokio::spawn(throttle::run_ops_replenish_thread(10, Duration::from_millis(100)));
//!
//! throttle::get_ops_token().await;
//! let _guard = throttle::open_file_permit().await;
//! // open the file here - the permit is released when the guard is dropped
//! # }
//! ```

mod semaphore;

static OPEN_FILES_LIMIT: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);
static OPS_THROTTLE: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);

/// Limit the number of files open at once, 0 disables the limit.
pub fn set_max_open_files(max_open_files: usize) {
    tracing::debug!("max open files: {}", max_open_files);
    OPEN_FILES_LIMIT.setup(max_open_files);
}

pub struct OpenFileGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn open_file_permit() -> OpenFileGuard {
    OpenFileGuard {
        _permit: OPEN_FILES_LIMIT.acquire().await,
    }
}

/// Set the size of the operations token bucket, 0 disables the throttle.
pub fn init_ops_tokens(ops_tokens: usize) {
    OPS_THROTTLE.setup(ops_tokens);
}

pub async fn get_ops_token() {
    OPS_THROTTLE.consume().await;
}

/// Refill the operations bucket up to `replenish` tokens every `interval`.
///
/// Returns immediately when the throttle is disabled, otherwise never returns.
pub async fn run_ops_replenish_thread(replenish: usize, interval: std::time::Duration) {
    OPS_THROTTLE.run_replenish_thread(replenish, interval).await;
}
