pub mod filesystem;

pub use filesystem::{ReadFileTool, WriteFileTool};
