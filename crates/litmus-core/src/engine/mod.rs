pub mod runner;

pub use runner::{ExecuteRequest, Executor, RunSummary};
