use crate::data::Data;
use crate::Pool;
use std::sync::Arc;

pub(crate) struct Sentry<'a> {
	active: bool,
	id: u32,
	data: &'a Arc<Data>,
}

impl<'a> Sentry<'a> {
	/// Create a new sentry tracker
	pub fn new(id: u32, data: &'a Arc<Data>) -> Sentry<'a> {
		Sentry {
			data,
			id,
			active: true,
		}
	}
	/// Cancel and destroy this sentry
	pub fn cancel(mut self) {
		self.active = false;
	}
}

impl Drop for Sentry<'_> {
	fn drop(&mut self) {
		// If this sentry was still active, then the worker loop unwound
		// without properly cancelling the sentry, so we should start a
		// replacement thread. Unit callbacks catch their own panics, so
		// this only triggers if the loop itself failed. A pool that is
		// shutting down refuses the respawn.
		if self.active {
			Pool::spin_up(self.id, self.data.clone());
		}
	}
}
