use crate::data::Data;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::resume_unwind;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// The type-erased unit callback of a task
pub(crate) type UnitFn = dyn Fn(u32) + Send + Sync + 'static;

/// The shared record behind a task handle.
///
/// A record is created with two references, one held by the submitter's
/// [`Task`] handle and one held by the scheduler. The scheduler's reference
/// lives in the ready queue, or in the children lists of pending parents,
/// or in a worker's hands while a unit executes, and is dropped once the
/// task finishes or is abandoned during pool teardown.
pub(crate) struct TaskInner {
	/// Units whose execution has not yet completed
	pub(crate) units_remaining: AtomicU32,
	/// Units not yet picked up by any worker
	pub(crate) units_unclaimed: AtomicU32,
	/// Direct parent tasks not yet complete
	pub(crate) parents_remaining: AtomicU32,
	/// Tasks to promote when this task finishes
	pub(crate) children: Mutex<Vec<Arc<TaskInner>>>,
	/// The unit callback, absent for artificial tasks
	pub(crate) work: Mutex<Option<Arc<UnitFn>>>,
	/// The first failure captured during unit execution
	pub(crate) panic: Mutex<Option<Box<dyn Any + Send>>>,
	/// Set once all units have completed
	pub(crate) done: AtomicBool,
	/// The pool this task was submitted to
	pub(crate) pool: Arc<Data>,
}

impl TaskInner {
	/// Block until all units of this task have completed
	pub(crate) fn wait(&self) {
		// Fast check without taking the pool lock
		if !self.done.load(Ordering::Acquire) {
			let data = &self.pool;
			// Workers of this same pool drain queued units while they
			// wait, so that waiting from inside a unit callback cannot
			// stall the pool
			let helping = crate::is_pool_worker(data);
			let mut queue = data.queue.lock();
			while !self.done.load(Ordering::Acquire) {
				if helping {
					// Run one ready unit instead of sleeping
					let (guard, ran) = data.run_queued_unit(queue);
					queue = guard;
					if ran {
						continue;
					}
				}
				data.task_done.wait(&mut queue);
			}
		}
		// Re-raise a failure captured during parallel execution
		if let Some(err) = self.panic.lock().take() {
			resume_unwind(err);
		}
	}
}

/// A handle to a submitted task.
///
/// The handle can be used to wait for the task's completion, and as a
/// parent of later submissions. Dropping the handle releases it without
/// affecting the task's execution.
pub struct Task {
	pub(crate) inner: Arc<TaskInner>,
}

impl Task {
	/// Wait for the completion of this task
	///
	/// If a unit callback of the task panicked during parallel execution,
	/// the first captured panic is taken out of the task and re-raised in
	/// the context of the caller.
	pub fn wait(&self) {
		self.inner.wait();
	}

	/// Wait for the completion of this task and release its handle
	///
	/// The handle is released even when a captured failure is re-raised.
	pub fn wait_and_release(self) {
		// The handle drops during unwinding if wait re-raises
		self.wait();
	}
}

impl fmt::Debug for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task")
			.field("done", &self.inner.done.load(Ordering::Relaxed))
			.field("units_remaining", &self.inner.units_remaining.load(Ordering::Relaxed))
			.finish()
	}
}

/// Submit a task to the given pool, wiring up its dependencies.
///
/// The `parents` slice holds the live parents only, with null entries
/// already filtered out by the caller. The `pool` closure resolves the
/// target pool lazily so that the fast path never instantiates it.
pub(crate) fn submit(
	pool: impl FnOnce() -> Arc<Data>,
	parents: &[&TaskInner],
	size: u32,
	work: Option<Arc<UnitFn>>,
) -> Option<Task> {
	// Tiny tasks without parents run inline on the calling thread, in
	// which case there is nothing to wait on or release
	if size == 1 && parents.is_empty() {
		if let Some(func) = work {
			func(0);
		}
		return None;
	}
	let data = pool();
	// A task of size zero still accounts exactly one unit, but is
	// always scheduled asynchronously
	let units = size.max(1);
	let inner = Arc::new(TaskInner {
		units_remaining: AtomicU32::new(units),
		units_unclaimed: AtomicU32::new(units),
		// The extra reference on the dependency counter keeps the task
		// off the queue until the wiring below has finished
		parents_remaining: AtomicU32::new(1),
		children: Mutex::new(Vec::new()),
		work: Mutex::new(work),
		panic: Mutex::new(None),
		done: AtomicBool::new(false),
		pool: data.clone(),
	});
	// Wire up each dependency under its parent's pool lock, so that a
	// concurrently finalizing parent either observes the new child or
	// has already published its completion
	for parent in parents {
		let _guard = parent.pool.queue.lock();
		// Parents that already completed contribute nothing
		if !parent.done.load(Ordering::Relaxed) {
			inner.parents_remaining.fetch_add(1, Ordering::SeqCst);
			parent.children.lock().push(inner.clone());
		}
	}
	// Drop the wiring reference; with no pending parents left the task
	// is ready to run
	if inner.parents_remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
		data.enqueue(inner.clone());
	}
	Some(Task {
		inner,
	})
}
