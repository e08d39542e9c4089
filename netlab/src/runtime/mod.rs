pub mod constants;
pub mod layout;
pub mod options;
pub mod workspace;

mod lab;
pub use lab::{Lab, RunningLab};
