use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use taskpool::{Builder, Pool};

/// A guard whose drop sets a flag, for observing payload cleanup
struct DropFlag(Arc<AtomicUsize>);

impl Drop for DropFlag {
	fn drop(&mut self) {
		self.0.fetch_add(1, Ordering::SeqCst);
	}
}

/// Spin until the gate opens, yielding the cpu in between
fn block_on(gate: &AtomicBool) {
	while !gate.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(1));
	}
}

#[test]
fn test_counter_over_many_units() {
	let pool = Pool::new(4);
	let counter = Arc::new(AtomicU32::new(0));

	let task = {
		let counter = counter.clone();
		pool.submit(1_000_000, move |_index| {
			counter.fetch_add(1, Ordering::Relaxed);
		})
	};

	task.expect("a task of this size is scheduled asynchronously").wait_and_release();
	assert_eq!(counter.load(Ordering::SeqCst), 1_000_000);
}

#[test]
fn test_each_unit_index_exactly_once() {
	let pool = Pool::new(4);
	let seen: Arc<Vec<AtomicBool>> = Arc::new((0..1000).map(|_| AtomicBool::new(false)).collect());

	let task = {
		let seen = seen.clone();
		pool.submit(1000, move |index| {
			// A repeated index would observe true here
			assert!(!seen[index as usize].swap(true, Ordering::SeqCst));
		})
	};

	task.unwrap().wait_and_release();
	assert!(seen.iter().all(|b| b.load(Ordering::SeqCst)));
}

#[test]
fn test_fast_path_runs_inline() {
	let pool = Pool::new(2);
	let thread_id = thread::current().id();
	let ran = Arc::new(AtomicBool::new(false));

	let task = {
		let ran = ran.clone();
		pool.submit(1, move |index| {
			assert_eq!(index, 0);
			// Tiny tasks execute on the submitting thread
			assert_eq!(thread::current().id(), thread_id);
			ran.store(true, Ordering::SeqCst);
		})
	};

	// The unit already ran, and there is nothing to wait on
	assert!(task.is_none());
	assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_size_zero_is_asynchronous() {
	let pool = Pool::new(2);
	let counter = Arc::new(AtomicU32::new(0));

	let task = {
		let counter = counter.clone();
		pool.submit(0, move |index| {
			assert_eq!(index, 0);
			counter.fetch_add(1, Ordering::SeqCst);
		})
	};

	// A zero-sized task always returns a handle
	let task = task.expect("zero-sized tasks never take the inline path");
	task.wait_and_release();
	// The callback ran exactly once
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dependent_task_observes_parent_writes() {
	let pool = Pool::new(4);
	let out: Arc<Vec<AtomicU32>> = Arc::new((0..10).map(|_| AtomicU32::new(0)).collect());

	let a = {
		let out = out.clone();
		pool.submit(10, move |index| {
			out[index as usize].store(index, Ordering::Relaxed);
		})
	};

	let b = {
		let out = out.clone();
		pool.submit_dep(&[a.as_ref()], 10, move |index| {
			// Parent completion happens-before every unit of the child
			assert_eq!(out[index as usize].load(Ordering::Relaxed), index);
		})
	};

	b.unwrap().wait_and_release();
	drop(a);
}

#[test]
fn test_panic_propagates_to_waiter_only() {
	let pool = Pool::new(4);

	let a = pool
		.submit(10, |index| {
			if index == 3 {
				panic!("unit three failed");
			}
		})
		.unwrap();

	// Children are scheduled regardless of a parent failure
	let b = pool.submit_dep(&[Some(&a)], 10, |_index| {}).unwrap();
	b.wait_and_release();

	// The captured failure is re-raised at wait
	let result = catch_unwind(AssertUnwindSafe(|| a.wait()));
	assert!(result.is_err());

	// The failure was taken by the first wait, a second wait is clean
	a.wait_and_release();
}

#[test]
fn test_first_failure_wins() {
	let pool = Pool::new(4);

	let task = pool
		.submit(8, |index| {
			panic!("unit {index} failed");
		})
		.unwrap();

	// Exactly one of the eight failures is reported
	let result = catch_unwind(AssertUnwindSafe(|| task.wait()));
	assert!(result.is_err());

	// The remaining failures were discarded, not queued up
	task.wait_and_release();
}

#[test]
fn test_wait_and_release_releases_on_panic() {
	let pool = Pool::new(2);
	let cleaned = Arc::new(AtomicUsize::new(0));

	let task = {
		let flag = DropFlag(cleaned.clone());
		pool.submit(4, move |index| {
			let _ = &flag;
			if index == 0 {
				panic!("failing unit");
			}
		})
	};

	let result = catch_unwind(AssertUnwindSafe(|| task.unwrap().wait_and_release()));
	assert!(result.is_err());

	// The work closure was retired exactly once at completion
	assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_pending_parent_gates_execution() {
	let pool = Pool::new(4);
	let gate = Arc::new(AtomicBool::new(false));
	let ran = Arc::new(AtomicBool::new(false));

	// Two parents which have already completed
	let done1 = pool.submit(4, |_index| {}).unwrap();
	let done2 = pool.submit(4, |_index| {}).unwrap();
	done1.wait();
	done2.wait();

	// One parent which is still pending
	let pending = {
		let gate = gate.clone();
		pool.submit(2, move |_index| block_on(&gate)).unwrap()
	};

	let child = {
		let ran = ran.clone();
		pool.submit_dep(
			&[Some(&done1), Some(&done2), None, None, Some(&pending)],
			1,
			move |_index| {
				ran.store(true, Ordering::SeqCst);
			},
		)
	};
	let child = child.expect("a supplied parent forces the asynchronous path");

	// Completed parents may be released while the child is pending
	drop(done1);
	drop(done2);

	// The child must not run while its last parent is gated
	thread::sleep(Duration::from_millis(100));
	assert!(!ran.load(Ordering::SeqCst));

	// Complete the pending parent, the child may now run
	gate.store(true, Ordering::SeqCst);
	child.wait_and_release();
	assert!(ran.load(Ordering::SeqCst));
	pending.wait_and_release();
}

#[test]
fn test_barrier_joins_parents() {
	let pool = Pool::new(4);
	let gate = Arc::new(AtomicBool::new(false));
	let counter = Arc::new(AtomicU32::new(0));

	let a = {
		let gate = gate.clone();
		let counter = counter.clone();
		pool.submit(4, move |_index| {
			block_on(&gate);
			counter.fetch_add(1, Ordering::SeqCst);
		})
		.unwrap()
	};
	let b = {
		let gate = gate.clone();
		let counter = counter.clone();
		pool.submit(4, move |_index| {
			block_on(&gate);
			counter.fetch_add(1, Ordering::SeqCst);
		})
		.unwrap()
	};

	// An artificial task joining both parents
	let join = pool.barrier(&[Some(&a), Some(&b)]).expect("parents are pending");

	let child = {
		let counter = counter.clone();
		pool.submit_dep(&[Some(&join)], 1, move |_index| {
			// Every unit of every parent completed before the join
			assert_eq!(counter.load(Ordering::SeqCst), 8);
		})
		.unwrap()
	};

	gate.store(true, Ordering::SeqCst);
	child.wait_and_release();
	join.wait_and_release();
	a.wait_and_release();
	b.wait_and_release();
}

#[test]
fn test_resize_preserves_inflight_work() {
	let pool = Pool::new(4);
	let seen: Arc<Vec<AtomicU32>> = Arc::new((0..8).map(|_| AtomicU32::new(0)).collect());

	let task = {
		let seen = seen.clone();
		pool.submit(8, move |index| {
			thread::sleep(Duration::from_millis(25));
			seen[index as usize].fetch_add(1, Ordering::SeqCst);
		})
		.unwrap()
	};

	// Shrink the pool while units are in flight
	pool.set_size(1);
	assert_eq!(pool.size(), 1);

	// The queue survived the resize and every index ran exactly once
	task.wait_and_release();
	assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_waiting_worker_helps_drain_the_queue() {
	// A single worker which waits on a nested submission would deadlock
	// without the cooperative help path
	let pool = Arc::new(Pool::new(1));
	let nested = Arc::new(AtomicU32::new(0));

	let task = {
		let pool = pool.clone();
		let nested = nested.clone();
		pool.clone().submit(2, move |index| {
			if index == 0 {
				let inner = {
					let nested = nested.clone();
					pool.submit(2, move |_index| {
						nested.fetch_add(1, Ordering::SeqCst);
					})
				};
				// Waiting from inside a unit callback is legal
				inner.unwrap().wait_and_release();
				assert_eq!(nested.load(Ordering::SeqCst), 2);
			}
		})
	};

	task.unwrap().wait_and_release();
	assert_eq!(nested.load(Ordering::SeqCst), 2);
}

#[test]
fn test_worker_thread_ids() {
	let pool = Pool::new(4);
	// The calling thread is not a pool worker
	assert_eq!(Pool::thread_id(), 0);

	let ids = Arc::new(Mutex::new(HashSet::new()));
	let task = {
		let ids = ids.clone();
		pool.submit(64, move |_index| {
			ids.lock().unwrap().insert(Pool::thread_id());
		})
	};
	task.unwrap().wait_and_release();

	// Worker ids are 1-based and bounded by the pool size
	let seen = ids.lock().unwrap();
	assert!(!seen.is_empty());
	assert!(seen.iter().all(|id| (1..=4).contains(id)));
}

#[test]
fn test_abandoned_tasks_release_payloads() {
	let pool = Pool::new(1);
	let gate = Arc::new(AtomicBool::new(false));
	let cleaned = Arc::new(AtomicUsize::new(0));

	// Keep the single worker busy
	let blocker = {
		let gate = gate.clone();
		pool.submit(2, move |_index| block_on(&gate)).unwrap()
	};

	// This task stays queued behind the blocker
	let victim = {
		let flag = DropFlag(cleaned.clone());
		pool.submit(4, move |_index| {
			let _ = &flag;
		})
		.unwrap()
	};

	// Open the gate only once the teardown is underway, so the worker
	// observes the shutdown before it can claim further units
	let opener = thread::spawn({
		let gate = gate.clone();
		move || {
			thread::sleep(Duration::from_millis(100));
			gate.store(true, Ordering::SeqCst);
		}
	});
	drop(pool);
	opener.join().unwrap();

	// The abandoned task never ran, but its payload was released
	assert_eq!(cleaned.load(Ordering::SeqCst), 1);
	drop(victim);
	drop(blocker);
	// Releasing the handles does not release the payload again
	assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cross_pool_dependencies() {
	let first = Pool::new(2);
	let second = Pool::new(2);
	let gate = Arc::new(AtomicBool::new(false));
	let counter = Arc::new(AtomicU32::new(0));

	let parent = {
		let gate = gate.clone();
		let counter = counter.clone();
		first
			.submit(4, move |_index| {
				block_on(&gate);
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap()
	};

	// The child runs on a different pool than its parent
	let child = {
		let counter = counter.clone();
		second
			.submit_dep(&[Some(&parent)], 4, move |_index| {
				// Every parent unit completed before any child unit
				assert_eq!(counter.load(Ordering::SeqCst), 4);
			})
			.unwrap()
	};

	gate.store(true, Ordering::SeqCst);
	child.wait_and_release();
	parent.wait_and_release();
}

#[test]
fn test_builder_configuration() {
	let pool = Builder::new().worker_threads(2).build();
	assert_eq!(pool.size(), 2);

	// The worker count is clamped to at least one thread
	let pool = Builder::new().worker_threads(0).build();
	assert_eq!(pool.size(), 1);

	// An unspecified worker count uses the number of CPUs
	let pool = Pool::default();
	assert!(pool.size() >= 1);
}

#[test]
fn test_thread_naming() {
	let pool = Builder::new().worker_threads(2).thread_name("unit-worker").build();

	let task = pool.submit(8, |_index| {
		assert_eq!(thread::current().name(), Some("unit-worker"));
	});

	task.unwrap().wait_and_release();
}

#[test]
fn test_resize_grows_the_pool() {
	let pool = Pool::new(1);
	assert_eq!(pool.size(), 1);

	pool.set_size(4);
	assert_eq!(pool.size(), 4);

	// The grown pool still executes work
	let counter = Arc::new(AtomicU32::new(0));
	let task = {
		let counter = counter.clone();
		pool.submit(100, move |_index| {
			counter.fetch_add(1, Ordering::SeqCst);
		})
	};
	task.unwrap().wait_and_release();
	assert_eq!(counter.load(Ordering::SeqCst), 100);
}
