//! ReAct 执行器：推理器抽象、追加式上下文、Reasoning -> Acting -> Observing 状态机

pub mod context;
pub mod events;
pub mod loop_;
pub mod planner;

pub use context::{PriorAnswer, ReactTrace, TraceStep};
pub use events::ReactEvent;
pub use loop_::{ReactExecutor, ReactState, ReactTask, DEFAULT_STEP_BUDGET};
pub use planner::{extract_json, parse_action, Action, LlmReasoner, Reasoner, ToolCall};
