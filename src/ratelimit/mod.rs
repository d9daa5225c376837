//! Limiters and the admission context they share.

mod bucket;
mod context;
mod limiter;
mod multi;
mod quota;

pub use bucket::TokenBucket;
pub use context::Context;
pub use limiter::Limiter;
pub use multi::MultiLimiter;
pub use quota::{Quota, TimeUnit};
