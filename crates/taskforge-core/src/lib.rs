//! The recursive task orchestrator core: task state machine, dependency
//! graph, event-driven runtime engine, process registry, and agent
//! invocation wrapper.

pub mod agent_wrapper;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod handler;
pub mod ids;
pub mod ledger;
pub mod processes;
pub mod store;
pub mod task;

pub use engine::{PushKind, PushMessage, RuntimeEngine, RuntimeSettings, StepAction};
pub use error::{Error, Result};
pub use events::{EntityType, Event, EventKind, Outcome};
pub use graph::DependencyGraph;
pub use ids::IdGenerator;
pub use ledger::EventLedger;
pub use processes::{create_default_registry, Process, ProcessContext, ProcessOutcome, ProcessRegistry, ProcessResult};
pub use store::EntityStore;
pub use task::{Agent, ConvMessage, ConvRole, ContextDocument, Task, TaskState, ToolCallRecord};
