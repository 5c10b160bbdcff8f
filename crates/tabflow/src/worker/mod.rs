pub mod executor;
pub mod pool;
pub mod queue;

pub use executor::{Executor, Outcome};
pub use pool::WorkerPool;
pub use queue::{ChannelQueue, Dispatch, JobQueue};
