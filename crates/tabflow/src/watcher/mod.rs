//! Directory watching: raw filesystem events in, one "ready" path per
//! settled file out.

pub mod filter;
pub mod scanner;
pub mod service;
pub mod stability;

pub use filter::FileFilter;
pub use scanner::DirectoryScanner;
pub use service::FileWatcher;
pub use stability::StabilityTracker;
