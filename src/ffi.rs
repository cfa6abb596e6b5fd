//! The C-compatible surface of the task pool.
//!
//! `Pool` and `Task` are opaque handles. A null `Pool` pointer always
//! refers to the process-wide default pool, which is created lazily on
//! first use. Task handles returned by [`task_submit_dep`] must
//! eventually be passed to [`task_release`] or [`task_wait_and_release`]
//! exactly once; a failure to do so leaks the task record.

use crate::data::Data;
use crate::task::{self, TaskInner, UnitFn};
use std::ffi::c_void;
use std::ptr;
use std::slice;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The worker count requesting one thread per hardware core
pub const POOL_AUTO: u32 = u32::MAX;

/// Opaque pool handle used across the C boundary
#[repr(C)]
pub struct Pool {
	_opaque: [u8; 0],
}

/// Opaque task handle used across the C boundary
#[repr(C)]
pub struct Task {
	_opaque: [u8; 0],
}

/// Callback invoked once per work unit, with the unit index and the
/// task payload. The callback may unwind; the first failure per task is
/// captured and re-raised by [`task_wait`].
pub type TaskFn = Option<unsafe extern "C-unwind" fn(index: u32, payload: *mut c_void)>;

/// Callback invoked exactly once to release the task payload
pub type TaskDeleter = Option<unsafe extern "C-unwind" fn(payload: *mut c_void)>;

/// The payload handed to every unit invocation of a task.
///
/// Dropping the payload runs the user deleter, or frees the internal
/// copy of the caller's bytes, whichever mode the submission selected.
/// The drop happens exactly once, when the task's work closure is
/// retired at completion or abandonment.
struct Payload {
	/// Pointer passed to every unit invocation
	ptr: *mut c_void,
	/// User deleter to run when the task is done
	deleter: TaskDeleter,
	/// Owned copy of the caller's payload bytes, if one was made
	_copy: Option<Box<[u8]>>,
}

// The submission contract requires the payload memory to remain valid
// until the task is done and to tolerate access from whichever worker
// thread runs each unit.
unsafe impl Send for Payload {}
unsafe impl Sync for Payload {}

impl Drop for Payload {
	fn drop(&mut self) {
		if let Some(deleter) = self.deleter {
			unsafe { deleter(self.ptr) };
		}
	}
}

/// Resolve a possibly-null pool pointer to its shared data
///
/// # Safety
///
/// A non-null pointer must have been returned by [`pool_create`] and
/// not yet passed to [`pool_destroy`].
unsafe fn resolve(pool: *mut Pool) -> Arc<Data> {
	if pool.is_null() {
		crate::global::default_data()
	} else {
		unsafe { &*(pool as *const crate::Pool) }.data.clone()
	}
}

/// Create a new task pool with the given number of worker threads
///
/// Passing [`POOL_AUTO`] chooses a thread count equal to the number of
/// available cores.
#[no_mangle]
pub extern "C" fn pool_create(size: u32) -> *mut Pool {
	let pool = if size == POOL_AUTO {
		crate::Pool::default()
	} else {
		crate::Pool::new(size as usize)
	};
	Box::into_raw(Box::new(pool)) as *mut Pool
}

/// Destroy a task pool, discarding remaining unfinished work
///
/// Abandoned tasks still release their payloads, but never complete and
/// never notify their children. It is undefined behavior to destroy a
/// pool while other threads wait for the completion of its tasks. A
/// null pool destroys the default pool; a later use of the default pool
/// creates a fresh one.
///
/// # Safety
///
/// A non-null `pool` must have been returned by [`pool_create`] and not
/// yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn pool_destroy(pool: *mut Pool) {
	if pool.is_null() {
		crate::global::destroy();
	} else {
		drop(unsafe { Box::from_raw(pool as *mut crate::Pool) });
	}
}

/// Get the number of worker threads in the pool
///
/// # Safety
///
/// See [`resolve`] for the pool pointer requirements.
#[no_mangle]
pub unsafe extern "C" fn pool_size(pool: *mut Pool) -> u32 {
	unsafe { resolve(pool) }.num_threads.load(Ordering::Relaxed) as u32
}

/// Resize the pool to the given number of worker threads
///
/// The current workers finish the units they are running and are then
/// joined; queued tasks survive the resize.
///
/// # Safety
///
/// See [`resolve`] for the pool pointer requirements.
#[no_mangle]
pub unsafe extern "C" fn pool_set_size(pool: *mut Pool, size: u32) {
	crate::Pool::resize(&unsafe { resolve(pool) }, size as usize);
}

/// Get the 1-based worker id of the calling thread
///
/// Returns zero when the calling thread is not a pool worker. The ids
/// of separate pools overlap.
#[no_mangle]
pub extern "C" fn pool_thread_id() -> u32 {
	crate::Pool::thread_id()
}

/// Submit a new task consisting of `size` work units to the pool
///
/// The callback `func` is invoked `size` times with unit indices in
/// `0..size` and the task payload. A null `func` creates an artificial
/// task that only encodes dependencies. The `parent` array lists
/// `parent_count` tasks which must complete before this task starts;
/// null entries are ignored.
///
/// The payload is handled in one of two modes. When `size == 0` or a
/// `payload_deleter` is supplied, the `payload` pointer is forwarded
/// verbatim to every unit invocation, and the deleter (if any) runs
/// exactly once after the task completes or is abandoned; the memory
/// must remain valid until then. Otherwise, when `payload_size` is
/// nonzero, an internal copy of that many bytes is made, handed to
/// every unit invocation, and freed automatically when the task is
/// done. A zero `payload_size` forwards the pointer verbatim too.
///
/// A task with `size == 1` and no supplied parents runs inline on the
/// calling thread, and null is returned since there is nothing to wait
/// on or release. A task of size zero accounts one unit but is always
/// scheduled asynchronously. All other submissions return a handle
/// which must eventually be released via [`task_release`].
///
/// # Safety
///
/// See [`resolve`] for the pool pointer requirements. The `parent`
/// array must hold `parent_count` readable entries, each null or a
/// live task handle. In copy mode, `payload` must point to
/// `payload_size` readable bytes.
#[no_mangle]
pub unsafe extern "C-unwind" fn task_submit_dep(
	pool: *mut Pool,
	parent: *const *const Task,
	parent_count: u32,
	size: u32,
	func: TaskFn,
	payload: *mut c_void,
	payload_size: u32,
	payload_deleter: TaskDeleter,
) -> *mut Task {
	// Collect the live parents, ignoring null entries
	let parents: Vec<&TaskInner> = if parent.is_null() || parent_count == 0 {
		Vec::new()
	} else {
		unsafe { slice::from_raw_parts(parent, parent_count as usize) }
			.iter()
			.filter_map(|task| unsafe { task.cast::<TaskInner>().as_ref() })
			.collect()
	};
	// Wrap the payload so that its cleanup runs exactly once when the
	// task is done, even when the task is abandoned in a pool teardown
	let work: Option<Arc<UnitFn>> = if func.is_some() || payload_deleter.is_some() {
		let payload = if size == 0 || payload_deleter.is_some() || payload_size == 0 || payload.is_null() {
			// The caller's pointer is forwarded verbatim, and must stay
			// valid until the task is done
			Payload {
				ptr: payload,
				deleter: payload_deleter,
				_copy: None,
			}
		} else {
			// Copy the payload bytes so the caller's buffer may be
			// released right after this call returns
			let mut copy = unsafe { slice::from_raw_parts(payload as *const u8, payload_size as usize) }
				.to_vec()
				.into_boxed_slice();
			Payload {
				ptr: copy.as_mut_ptr() as *mut c_void,
				deleter: None,
				_copy: Some(copy),
			}
		};
		match func {
			Some(func) => Some(Arc::new(move |index| {
				let payload = &payload;
				unsafe { func(index, payload.ptr) }
			})),
			// An artificial task may still carry a payload to release
			None => Some(Arc::new(move |_index| {
				let _ = &payload;
			})),
		}
	} else {
		None
	};
	// Submit the task, resolving the pool lazily so that the inline
	// fast path never instantiates the default pool
	match task::submit(|| unsafe { resolve(pool) }, &parents, size, work) {
		Some(task) => Arc::into_raw(task.inner) as *mut Task,
		None => ptr::null_mut(),
	}
}

/// Submit a new task without dependencies
///
/// Equivalent to [`task_submit_dep`] with an empty parent list.
///
/// # Safety
///
/// See [`task_submit_dep`].
#[no_mangle]
pub unsafe extern "C-unwind" fn task_submit(
	pool: *mut Pool,
	size: u32,
	func: TaskFn,
	payload: *mut c_void,
	payload_size: u32,
	payload_deleter: TaskDeleter,
) -> *mut Task {
	unsafe { task_submit_dep(pool, ptr::null(), 0, size, func, payload, payload_size, payload_deleter) }
}

/// Submit a new task and wait for its completion
///
/// Equivalent to [`task_submit`] followed by [`task_wait_and_release`].
///
/// # Safety
///
/// See [`task_submit_dep`].
#[no_mangle]
pub unsafe extern "C-unwind" fn task_submit_and_wait(
	pool: *mut Pool,
	size: u32,
	func: TaskFn,
	payload: *mut c_void,
) {
	let task = unsafe { task_submit(pool, size, func, payload, 0, None) };
	unsafe { task_wait_and_release(task) };
}

/// Release a task handle
///
/// Releasing a handle does not affect the task's execution. Following
/// this call the handle must no longer be waited on or used as a parent
/// of later submissions. A null handle is a no-op.
///
/// # Safety
///
/// A non-null `task` must have been returned by [`task_submit_dep`] and
/// not yet released.
#[no_mangle]
pub unsafe extern "C" fn task_release(task: *mut Task) {
	if !task.is_null() {
		drop(unsafe { Arc::from_raw(task.cast_const().cast::<TaskInner>()) });
	}
}

/// Wait for the completion of the given task
///
/// If a failure was captured during parallel execution of the task,
/// this call re-raises it in the context of the caller. When several
/// units fail, only the first captured failure is reported. A null
/// handle is a no-op.
///
/// # Safety
///
/// A non-null `task` must be a live handle from [`task_submit_dep`].
#[no_mangle]
pub unsafe extern "C-unwind" fn task_wait(task: *mut Task) {
	if let Some(task) = unsafe { task.cast_const().cast::<TaskInner>().as_ref() } {
		task.wait();
	}
}

/// Wait for the completion of the given task and release its handle
///
/// The handle is released even when a captured failure is re-raised. A
/// null handle is a no-op.
///
/// # Safety
///
/// A non-null `task` must be a live handle from [`task_submit_dep`],
/// not yet released.
#[no_mangle]
pub unsafe extern "C-unwind" fn task_wait_and_release(task: *mut Task) {
	if !task.is_null() {
		// Reconstitute the handle first, so the release also happens
		// when the wait re-raises a captured failure
		let task = unsafe { Arc::from_raw(task.cast_const().cast::<TaskInner>()) };
		task.wait();
	}
}
