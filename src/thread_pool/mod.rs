//! Thread pools a [`KvsServer`](crate::KvsServer) can serve its connections on.
use crate::Result;

mod naive;
mod rayon_pool;
mod shared_queue;

pub use naive::NaiveThreadPool;
pub use rayon_pool::RayonThreadPool;
pub use shared_queue::SharedQueueThreadPool;

/// The behavior shared by every thread pool
pub trait ThreadPool: Sized {
    /// Creates a pool with `threads` worker threads.
    ///
    /// # Errors
    /// returns an error if the worker threads could not be started
    fn new(threads: u32) -> Result<Self>;

    /// Runs `job` on a thread of the pool.
    ///
    /// A panicking job does not reduce the number of threads in the pool.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
