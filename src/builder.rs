use crate::data::Data;
use crate::Pool;
use crate::MAX_THREADS;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct Builder {
	num_threads: Option<usize>,
	thread_name: Option<String>,
	thread_stack_size: Option<usize>,
}

impl Builder {
	/// Initiate a new [`Builder`].
	///
	/// # Examples
	///
	/// ```
	/// let builder = taskpool::Builder::new();
	/// ```
	pub fn new() -> Builder {
		Builder {
			num_threads: None,
			thread_name: None,
			thread_stack_size: None,
		}
	}

	/// Set the number of worker threads spawned by the built [`Pool`].
	/// If not specified, defaults to the number of CPUs. The value is
	/// clamped to `1..=MAX_THREADS`.
	///
	/// # Examples
	///
	/// Eight threads will be alive for this pool:
	///
	/// ```
	/// let pool = taskpool::Builder::new()
	///     .worker_threads(8)
	///     .build();
	///
	/// if let Some(task) = pool.submit(64, |_index| {
	///     // Work on one unit
	/// }) {
	///     task.wait_and_release();
	/// }
	/// ```
	pub fn worker_threads(mut self, num_threads: usize) -> Builder {
		self.num_threads = Some(num_threads);
		self
	}

	/// Set the thread name for each of the threads spawned by the built
	/// [`Pool`]. If not specified, threads spawned by the pool will be
	/// unnamed.
	///
	/// # Examples
	///
	/// Each thread spawned by this pool will have the name "foo":
	///
	/// ```
	/// use std::thread;
	///
	/// let pool = taskpool::Builder::new()
	///     .thread_name("foo")
	///     .build();
	///
	/// if let Some(task) = pool.submit(8, |_index| {
	///     assert_eq!(thread::current().name(), Some("foo"));
	/// }) {
	///     task.wait_and_release();
	/// }
	/// ```
	pub fn thread_name(mut self, name: impl Into<String>) -> Builder {
		self.thread_name = Some(name.into());
		self
	}

	/// Set the stack size (in bytes) for each of the threads spawned by
	/// the built [`Pool`]. If not specified, threads spawned by the pool
	/// will have a stack size [as specified in the `std::thread`
	/// documentation][thread].
	///
	/// [thread]: https://doc.rust-lang.org/std/thread/index.html#stack-size
	///
	/// # Examples
	///
	/// Each thread spawned by this pool will have a 4 MB stack:
	///
	/// ```
	/// let pool = taskpool::Builder::new()
	///     .thread_stack_size(4_000_000)
	///     .build();
	/// ```
	pub fn thread_stack_size(mut self, size: usize) -> Builder {
		self.thread_stack_size = Some(size);
		self
	}

	/// Finalize the [`Builder`] and build the [`Pool`].
	///
	/// # Examples
	///
	/// ```
	/// let pool = taskpool::Builder::new()
	///     .worker_threads(8)
	///     .thread_stack_size(4_000_000)
	///     .build();
	/// ```
	pub fn build(self) -> Pool {
		// Calculate how many threads to spawn
		let threads = if let Some(num_threads) = self.num_threads {
			num_threads.clamp(1, MAX_THREADS)
		} else {
			num_cpus::get().clamp(1, MAX_THREADS)
		};
		// Create the pool shared data
		let data = Arc::new(Data {
			name: self.thread_name,
			stack_size: self.thread_stack_size,
			num_threads: AtomicUsize::new(threads),
			shutdown: AtomicBool::new(false),
			queue: Mutex::new(VecDeque::new()),
			work_available: Condvar::new(),
			task_done: Condvar::new(),
			handles: Mutex::new(Vec::new()),
		});
		// Spawn the desired number of workers
		for id in 1..=threads {
			Pool::spin_up(id as u32, data.clone());
		}
		// Return the new pool
		Pool {
			data,
		}
	}
}
