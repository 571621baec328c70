pub mod base;
pub mod error;
pub mod graph;
pub mod table;

pub use error::ConsoleError;
pub use graph::GraphEditor;
pub use table::TaskTableSync;
