//! Request execution behind limiters.

mod executor;
mod throttle;

pub use executor::{Executor, HttpError, HttpExecutor};
pub use throttle::{ThrottlingTransport, TransportError};
