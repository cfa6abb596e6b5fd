use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("A default task pool has already been initialised")]
	GlobalPoolExists,
}
