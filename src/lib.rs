mod builder;
mod data;
mod error;
mod global;
mod sentry;
mod task;

pub mod ffi;

pub use crate::builder::Builder;
pub use crate::error::Error;
pub use crate::task::Task;

use crate::data::Data;
use crate::sentry::Sentry;
use crate::task::TaskInner;
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The maximum number of threads which can be spawned
pub const MAX_THREADS: usize = 512;

thread_local! {
	/// The owning pool and 1-based worker id of the current thread
	static WORKER_ID: Cell<(usize, u32)> = const { Cell::new((0, 0)) };
}

/// Check whether the calling thread is a worker of the given pool
pub(crate) fn is_pool_worker(data: &Arc<Data>) -> bool {
	WORKER_ID.with(|cell| cell.get().0) == Arc::as_ptr(data) as usize
}

/// A pool of worker threads executing tasks made up of independent work
/// units, with optional parent/child dependencies between tasks.
pub struct Pool {
	pub(crate) data: Arc<Data>,
}

impl Default for Pool {
	fn default() -> Self {
		Pool::new(num_cpus::get())
	}
}

impl fmt::Debug for Pool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Pool").field("workers", &self.size()).finish()
	}
}

impl Pool {
	/// Create a new task pool
	///
	/// The number of workers is clamped to `1..=MAX_THREADS`.
	pub fn new(workers: usize) -> Self {
		Builder::new().worker_threads(workers).build()
	}

	/// Submit a task consisting of `size` independent work units
	///
	/// The callback is invoked once for every unit index in `0..size`, in
	/// no particular order, potentially from several worker threads at
	/// once. A task of size one is executed inline on the calling thread,
	/// in which case `None` is returned and there is nothing to wait on.
	/// A task of size zero accounts exactly one unit but is always
	/// scheduled asynchronously.
	pub fn submit<F>(&self, size: u32, func: F) -> Option<Task>
	where
		F: Fn(u32) + Send + Sync + 'static,
	{
		task::submit(|| self.data.clone(), &[], size, Some(Arc::new(func)))
	}

	/// Submit a task which must not start before its parents complete
	///
	/// Entries of `parents` that are `None` are ignored. Parents that
	/// already completed contribute no further ordering. The task starts
	/// once every remaining parent has finished; completion of a parent
	/// happens-before every unit of the task. A task of size one with no
	/// supplied parents is executed inline, as with [`Pool::submit`].
	pub fn submit_dep<F>(&self, parents: &[Option<&Task>], size: u32, func: F) -> Option<Task>
	where
		F: Fn(u32) + Send + Sync + 'static,
	{
		let parents: Vec<&TaskInner> = parents.iter().filter_map(|p| p.map(|t| &*t.inner)).collect();
		task::submit(|| self.data.clone(), &parents, size, Some(Arc::new(func)))
	}

	/// Submit an artificial task encoding a dependency join
	///
	/// No unit work is executed, but dependency counters still propagate,
	/// so the returned task completes once all parents have completed and
	/// can itself be used as a parent. Returns `None` only when every
	/// entry of `parents` is `None`; an already-completed parent still
	/// produces a task handle, which completes immediately.
	pub fn barrier(&self, parents: &[Option<&Task>]) -> Option<Task> {
		let parents: Vec<&TaskInner> = parents.iter().filter_map(|p| p.map(|t| &*t.inner)).collect();
		task::submit(|| self.data.clone(), &parents, 1, None)
	}

	/// Set this pool as the process-wide default pool
	///
	/// The default pool is the one used when a null pool is passed across
	/// the C boundary. It is otherwise created lazily on first use.
	pub fn build_global(self) -> Result<(), Error> {
		crate::global::install(self)
	}

	/// Get the current number of worker threads in this pool
	pub fn size(&self) -> usize {
		self.data.num_threads.load(Ordering::Relaxed)
	}

	/// Resize this pool to the given number of worker threads
	///
	/// The current workers are joined once the units they are running
	/// have finished, and a fresh worker set is spawned. Queued tasks
	/// survive the resize.
	pub fn set_size(&self, workers: usize) {
		Pool::resize(&self.data, workers);
	}

	/// Get the 1-based worker id of the calling thread
	///
	/// Returns zero when the calling thread is not a pool worker. The
	/// ids of separate pools overlap.
	pub fn thread_id() -> u32 {
		WORKER_ID.with(|cell| cell.get().1)
	}

	/// Replace the worker set of a pool, preserving the queue
	pub(crate) fn resize(data: &Arc<Data>, workers: usize) {
		let workers = workers.clamp(1, MAX_THREADS);
		// Quiesce the current worker set
		Pool::halt(data);
		// Allow workers to run again
		data.shutdown.store(false, Ordering::SeqCst);
		data.num_threads.store(workers, Ordering::Relaxed);
		// Spawn the replacement worker set
		for id in 1..=workers {
			Pool::spin_up(id as u32, data.clone());
		}
	}

	/// Signal shutdown and join the current worker set
	pub(crate) fn halt(data: &Arc<Data>) {
		// Set the flag under the pool lock so no worker misses it
		{
			let _queue = data.queue.lock();
			data.shutdown.store(true, Ordering::SeqCst);
		}
		// Wake idle workers so they can observe the shutdown
		data.work_available.notify_all();
		// Wake helping waiters so nested waits can drain and converge
		data.task_done.notify_all();
		// Join the workers outside the pool lock
		let handles = mem::take(&mut *data.handles.lock());
		for handle in handles {
			let _ = handle.join();
		}
	}

	/// Spawn a new worker thread with the given 1-based id
	pub(crate) fn spin_up(id: u32, data: Arc<Data>) {
		// Register the handle under the lock so halt can join this worker
		let mut handles = data.handles.lock();
		// Never spawn into a pool that is shutting down
		if data.shutdown.load(Ordering::SeqCst) {
			return;
		}
		// Create a new thread builder
		let mut builder = std::thread::Builder::new();
		// Assign a name to the thread if specified
		if let Some(ref name) = data.name {
			builder = builder.name(name.clone());
		}
		// Assign a stack size to the thread if specified
		if let Some(stack_size) = data.stack_size {
			builder = builder.stack_size(stack_size);
		}
		// Spawn a new worker thread
		let worker = {
			let data = data.clone();
			move || {
				// Create a new sentry watcher
				let sentry = Sentry::new(id, &data);
				// Publish the worker id for thread_id lookups
				WORKER_ID.with(|cell| cell.set((Arc::as_ptr(&data) as usize, id)));
				// Loop continuously, processing queued units
				let mut queue = data.queue.lock();
				loop {
					// This worker set was asked to exit
					if data.shutdown.load(Ordering::SeqCst) {
						break;
					}
					// Run one queued unit, or sleep until work arrives
					let (guard, ran) = data.run_queued_unit(queue);
					queue = guard;
					if !ran {
						data.work_available.wait(&mut queue);
					}
				}
				drop(queue);
				// This thread has exited cleanly
				sentry.cancel();
			}
		};
		if let Ok(handle) = builder.spawn(worker) {
			handles.push(handle);
		}
	}

	/// Tear down a pool, abandoning any still-queued tasks
	pub(crate) fn teardown(data: &Arc<Data>) {
		Pool::halt(data);
		// Abandoned tasks never notify their children, but their payload
		// cleanup still runs exactly once
		let abandoned: Vec<_> = data.queue.lock().drain(..).collect();
		for task in abandoned {
			drop(task.work.lock().take());
		}
	}
}

impl Drop for Pool {
	fn drop(&mut self) {
		// Remaining unfinished work is discarded. Destroying a pool while
		// other threads wait on its tasks leaves those waiters blocked
		// forever, since abandoned tasks never complete.
		Pool::teardown(&self.data);
	}
}
