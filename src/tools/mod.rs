//! External tool adapters: connection specs, live handles, and the per-session registry.

pub mod error;
pub mod handle;
pub mod protocol;
pub mod registry;
pub mod spec;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use error::{ToolError, ToolResult};
pub use handle::{ToolHandle, ToolStatus};
pub use protocol::ToolDescriptor;
pub use registry::{ConnectOptions, ToolRegistry};
pub use spec::{
    load_tool_file, ToolProfile, ToolSpec, DATA_EXPLORATION, EMBEDDED_DB, FILESYSTEM,
    TABULAR_DATA,
};
