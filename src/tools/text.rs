//! 文本类工具

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::{single_result, string_arg};
use crate::tools::{Tool, ToolArgs, ToolError, ToolOutput};

/// 统计子串（不重叠）出现次数，例如 "strawberry" 中 "r" 出现 3 次
pub struct CountSubstringsTool;

#[async_trait]
impl Tool for CountSubstringsTool {
    fn name(&self) -> &str {
        "count_substrings"
    }

    fn description(&self) -> &str {
        "Counts the non-overlapping occurrences of a substring in a string."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "string": { "type": "string" },
                "substring": { "type": "string" }
            },
            "required": ["string", "substring"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let haystack = string_arg(self.name(), args, "string")?;
        let needle = string_arg(self.name(), args, "substring")?;
        if needle.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "'substring' must not be empty".to_string(),
            });
        }
        Ok(single_result(haystack.matches(needle).count()))
    }
}
