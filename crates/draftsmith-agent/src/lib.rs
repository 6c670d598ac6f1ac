pub mod graph;
pub mod orchestrator;
pub mod router;
pub mod session;

pub use graph::{AgentGraph, GraphContext, RoutingGraph, Snapshot, SnapshotStream};
pub use orchestrator::Orchestrator;
pub use router::Router;
pub use session::{SessionHandle, SessionManager};
