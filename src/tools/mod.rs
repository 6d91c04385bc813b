//! 工具层（Tool Invoker）：注册表、带超时的执行器、内置工具与远程工具注册表

pub mod arithmetic;
pub mod datetime;
pub mod executor;
pub mod registry;
pub mod remote;
pub mod text;

pub use arithmetic::{ArithmeticOp, ArithmeticTool};
pub use datetime::{ClockQuery, ClockTool, DayOfWeekTool};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolArgs, ToolError, ToolOutput, ToolRegistry};
pub use remote::{RemoteTool, RemoteToolSpec};
pub use text::CountSubstringsTool;

/// 按名称注册内置工具集：`arithmetic`、`string`、`datetime`；未知名称记录警告后忽略
pub fn builtin_registry(toolsets: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for set in toolsets {
        match set.as_str() {
            "arithmetic" => {
                for tool in ArithmeticTool::all() {
                    registry.register(tool);
                }
            }
            "string" => registry.register(CountSubstringsTool),
            "datetime" => {
                registry.register(ClockTool::new(ClockQuery::Now));
                registry.register(ClockTool::new(ClockQuery::Today));
                registry.register(ClockTool::new(ClockQuery::UtcNow));
                registry.register(DayOfWeekTool);
            }
            other => tracing::warn!(toolset = %other, "unknown builtin toolset ignored"),
        }
    }
    registry
}
