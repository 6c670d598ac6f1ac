pub mod mail;

pub use mail::{GeneralTool, NewTool, ReplyTool, ReviseTool, SummaryTool};
