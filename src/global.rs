use crate::data::Data;
use crate::Error;
use crate::Pool;
use parking_lot::Mutex;
use std::sync::Arc;

/// The process-wide default pool, created lazily on first use
static POOL: Mutex<Option<Pool>> = Mutex::new(None);

/// Get the shared data of the default pool, creating it if needed
pub(crate) fn default_data() -> Arc<Data> {
	let mut slot = POOL.lock();
	slot.get_or_insert_with(Pool::default).data.clone()
}

/// Install the given pool as the default pool
pub(crate) fn install(pool: Pool) -> Result<(), Error> {
	let mut slot = POOL.lock();
	// Check if a default pool has already been created
	if slot.is_some() {
		return Err(Error::GlobalPoolExists);
	}
	// Set this pool as the default pool
	*slot = Some(pool);
	// The default pool was installed successfully
	Ok(())
}

/// Tear down the default pool, if one exists
///
/// A subsequent use of the default pool lazily creates a fresh one.
pub(crate) fn destroy() {
	let pool = POOL.lock().take();
	// The teardown joins worker threads, so it runs outside the lock
	drop(pool);
}
