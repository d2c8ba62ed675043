pub mod docker;
pub mod lines;

pub use docker::{ContainerError, ContainerRunner};
pub use lines::{split_lines, LineSplitter};
