//! Building blocks for admission control and resource reuse
//!
//! These types hold no locks of their own. Components that share them across
//! tasks wrap them in a lock sized to their access pattern.

pub mod backoff;
pub mod object_pool;
pub mod sliding_window;
pub mod token_bucket;

pub use backoff::Backoff;
pub use object_pool::{ObjectPool, PoolError, PooledObject};
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucket;
