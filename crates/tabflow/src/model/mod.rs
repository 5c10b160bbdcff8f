//! Records shared by the scheduler, the workers and the stores.

pub mod data_file;
pub mod job;

pub use data_file::{DataFileRecord, DataSource};
pub use job::{JobStatus, ParameterBag, ProcessingJob, StatusUpdate};
