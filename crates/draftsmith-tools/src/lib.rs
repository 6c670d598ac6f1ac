pub mod builtin;
pub mod handlers;
pub mod registry;

pub use handlers::HandlerOutput;
pub use registry::ToolRegistry;
