use crate::task::{TaskInner, UnitFn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The ready-task FIFO shared by all workers of a pool
pub(crate) type Queue = VecDeque<Arc<TaskInner>>;

pub(crate) struct Data {
	/// The name of each thread
	pub(crate) name: Option<String>,
	/// The stack size for each thread
	pub(crate) stack_size: Option<usize>,
	/// The current number of workers
	pub(crate) num_threads: AtomicUsize,
	/// Set when the current worker set should exit
	pub(crate) shutdown: AtomicBool,
	/// Tasks whose parents have all completed, in submission order
	pub(crate) queue: Mutex<Queue>,
	/// Signalled when a task is pushed onto the queue
	pub(crate) work_available: Condvar,
	/// Signalled when a task finishes
	pub(crate) task_done: Condvar,
	/// Join handles for the current worker set
	pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A single work unit handed out to a worker or a helping waiter
pub(crate) struct Claim {
	/// The task the unit belongs to
	task: Arc<TaskInner>,
	/// The unit index to pass to the callback
	index: u32,
	/// The task's work closure, if it has one
	work: Option<Arc<UnitFn>>,
}

impl Claim {
	/// Run the claimed unit without holding the pool lock
	pub(crate) fn execute(self) -> Arc<TaskInner> {
		let Claim {
			task,
			index,
			work,
		} = self;
		// Artificial tasks have no callback to run
		if let Some(func) = work {
			// Run the unit, capturing a panic so sibling units still run
			if let Err(err) = catch_unwind(AssertUnwindSafe(|| func(index))) {
				// The first failure wins, later ones are discarded
				let mut slot = task.panic.lock();
				if slot.is_none() {
					*slot = Some(err);
				}
			}
			// The executor's reference to the work closure drops here,
			// before the completion decrement, so that finalization holds
			// the last one and payload cleanup runs at completion
		}
		task
	}
}

impl Data {
	/// Push a ready task onto this pool's queue and wake a worker
	pub(crate) fn enqueue(&self, task: Arc<TaskInner>) {
		self.queue.lock().push_back(task);
		self.work_available.notify_one();
		// Helping waiters sleep on task_done, let them re-examine the queue
		self.task_done.notify_all();
	}

	/// Claim one unit from the task at the front of the queue
	pub(crate) fn claim_unit(&self, queue: &mut Queue) -> Option<Claim> {
		let task = queue.front()?.clone();
		// Hand out the next unclaimed unit index
		let index = task.units_unclaimed.fetch_sub(1, Ordering::SeqCst) - 1;
		// The last unit was handed out, so the task leaves the queue
		// while workers race to finish the claimed units
		if index == 0 {
			queue.pop_front();
		}
		// Take a reference to the work closure for the unlocked call
		let work = task.work.lock().clone();
		Some(Claim {
			task,
			index,
			work,
		})
	}

	/// Mark the task as done and resolve its forward dependencies.
	/// Ready children submitted to this pool are enqueued directly;
	/// children of other pools are returned so the caller can enqueue
	/// them once this pool's lock is released.
	fn finalize(&self, queue: &mut Queue, task: &TaskInner) -> Vec<Arc<TaskInner>> {
		// All units have completed and the payload has been released
		task.done.store(true, Ordering::Release);
		// Resolve the forward dependencies of this task
		let mut promoted = false;
		let mut foreign = Vec::new();
		for child in task.children.lock().drain(..) {
			// Promote any child whose last parent just completed
			if child.parents_remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
				if std::ptr::eq(Arc::as_ptr(&child.pool), self) {
					queue.push_back(child);
					promoted = true;
				} else {
					foreign.push(child);
				}
			}
		}
		// Wake idle workers if new tasks became ready
		if promoted {
			self.work_available.notify_all();
		}
		// Wake anything blocked on task completion
		self.task_done.notify_all();
		foreign
	}

	/// Claim and run one queued unit, releasing the pool lock around the
	/// callback and re-acquiring it afterwards. Returns the guard together
	/// with whether a unit was run, so callers can decide to sleep.
	pub(crate) fn run_queued_unit<'a>(
		&'a self,
		mut queue: MutexGuard<'a, Queue>,
	) -> (MutexGuard<'a, Queue>, bool) {
		// Take one unit from the front task, if any
		let Some(claim) = self.claim_unit(&mut queue) else {
			return (queue, false);
		};
		// Run the unit without holding the pool lock
		drop(queue);
		let task = claim.execute();
		// Account the executed unit under the pool lock
		let mut queue = self.queue.lock();
		if task.units_remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
			// This was the last unit, so the task payload is released
			// now. The drop runs user cleanup, so it happens without
			// the pool lock, and before the done flag is published, so
			// that a returning wait observes the finished cleanup.
			drop(queue);
			drop(task.work.lock().take());
			queue = self.queue.lock();
			// Mark the task done and promote its ready children
			let foreign = self.finalize(&mut queue, &task);
			// Children of other pools are enqueued over there, with
			// this pool's lock released, so that two pools finalizing
			// into each other cannot deadlock
			if !foreign.is_empty() {
				drop(queue);
				for child in foreign {
					let data = child.pool.clone();
					data.enqueue(child);
				}
				queue = self.queue.lock();
			}
		}
		(queue, true)
	}
}
