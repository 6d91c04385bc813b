//! 四则运算类工具：add / subtract / multiply / divide / modulus / power
//!
//! 参数名沿用各运算的数学称谓（augend/summand、dividend/divisor …），结果为 {"result": number}。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::registry::{number_arg, number_value, single_result};
use crate::tools::{Tool, ToolArgs, ToolError, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Power,
}

impl ArithmeticOp {
    pub const ALL: [ArithmeticOp; 6] = [
        ArithmeticOp::Add,
        ArithmeticOp::Subtract,
        ArithmeticOp::Multiply,
        ArithmeticOp::Divide,
        ArithmeticOp::Modulus,
        ArithmeticOp::Power,
    ];

    fn name(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "subtract",
            ArithmeticOp::Multiply => "multiply",
            ArithmeticOp::Divide => "divide",
            ArithmeticOp::Modulus => "modulus",
            ArithmeticOp::Power => "power",
        }
    }

    fn description(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "Returns the sum of two numbers.",
            ArithmeticOp::Subtract => "Returns the difference of two numbers.",
            ArithmeticOp::Multiply => "Returns the product of two numbers.",
            ArithmeticOp::Divide => "Returns the quotient of two numbers.",
            ArithmeticOp::Modulus => "Returns the modulus of two numbers.",
            ArithmeticOp::Power => "Returns the result of raising a base to an exponent.",
        }
    }

    /// (左操作数, 右操作数) 参数名
    fn operands(self) -> (&'static str, &'static str) {
        match self {
            ArithmeticOp::Add => ("augend", "summand"),
            ArithmeticOp::Subtract => ("minuend", "subtrahend"),
            ArithmeticOp::Multiply => ("multiplicand", "multiplier"),
            ArithmeticOp::Divide | ArithmeticOp::Modulus => ("dividend", "divisor"),
            ArithmeticOp::Power => ("base", "exponent"),
        }
    }
}

/// 单个运算对应一个工具实例
pub struct ArithmeticTool {
    op: ArithmeticOp,
}

impl ArithmeticTool {
    pub fn new(op: ArithmeticOp) -> Self {
        Self { op }
    }

    pub fn all() -> Vec<ArithmeticTool> {
        ArithmeticOp::ALL.iter().map(|op| ArithmeticTool::new(*op)).collect()
    }
}

#[async_trait]
impl Tool for ArithmeticTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn parameters_schema(&self) -> Value {
        let (lhs, rhs) = self.op.operands();
        serde_json::json!({
            "type": "object",
            "properties": {
                lhs: { "type": "number" },
                rhs: { "type": "number" }
            },
            "required": [lhs, rhs]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let name = self.op.name();
        let (lhs_key, rhs_key) = self.op.operands();
        let lhs = number_arg(name, args, lhs_key)?;
        let rhs = number_arg(name, args, rhs_key)?;

        let value = match self.op {
            ArithmeticOp::Add => lhs + rhs,
            ArithmeticOp::Subtract => lhs - rhs,
            ArithmeticOp::Multiply => lhs * rhs,
            ArithmeticOp::Divide | ArithmeticOp::Modulus if rhs == 0.0 => {
                return Err(ToolError::Execution {
                    tool: name.to_string(),
                    reason: "Division by zero is not allowed.".to_string(),
                })
            }
            ArithmeticOp::Divide => lhs / rhs,
            // 取模结果与除数同号
            ArithmeticOp::Modulus => ((lhs % rhs) + rhs) % rhs,
            ArithmeticOp::Power => lhs.powf(rhs),
        };
        if !value.is_finite() {
            return Err(ToolError::Execution {
                tool: name.to_string(),
                reason: format!("result is not finite ({value})"),
            });
        }
        Ok(single_result(number_value(value)))
    }
}
