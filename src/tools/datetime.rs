//! 日期时间类工具：now / today / utc_now / day_of_week

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::tools::registry::{single_result, string_arg};
use crate::tools::{Tool, ToolArgs, ToolError, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockQuery {
    Now,
    Today,
    UtcNow,
}

/// 无参数的时钟查询
pub struct ClockTool {
    query: ClockQuery,
}

impl ClockTool {
    pub fn new(query: ClockQuery) -> Self {
        Self { query }
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        match self.query {
            ClockQuery::Now => "now",
            ClockQuery::Today => "today",
            ClockQuery::UtcNow => "utc_now",
        }
    }

    fn description(&self) -> &str {
        match self.query {
            ClockQuery::Now => "Returns the current local date and time as an ISO format string.",
            ClockQuery::Today => "Returns the current local date as an ISO format string.",
            ClockQuery::UtcNow => "Returns the current UTC date and time as an ISO format string.",
        }
    }

    async fn execute(&self, _args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let value = match self.query {
            ClockQuery::Now => Local::now().to_rfc3339(),
            ClockQuery::Today => Local::now().date_naive().to_string(),
            ClockQuery::UtcNow => Utc::now().to_rfc3339(),
        };
        Ok(single_result(value))
    }
}

/// 给定 ISO 日期（或日期时间）返回星期几，如 "Monday"
pub struct DayOfWeekTool;

#[async_trait]
impl Tool for DayOfWeekTool {
    fn name(&self) -> &str {
        "day_of_week"
    }

    fn description(&self) -> &str {
        "Returns the day of the week for a given date string in ISO format."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "date": { "type": "string", "description": "e.g. 2024-03-01" } },
            "required": ["date"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> Result<ToolOutput, ToolError> {
        let raw = string_arg(self.name(), args, "date")?.trim();
        let date = parse_iso_date(raw).ok_or_else(|| ToolError::InvalidArguments {
            tool: self.name().to_string(),
            reason: format!("not an ISO date: {raw}"),
        })?;
        Ok(single_result(date.format("%A").to_string()))
    }
}

fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}
