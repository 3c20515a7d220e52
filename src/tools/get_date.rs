use crate::error::ToolError;
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Arguments for the GetDate tool
#[derive(Debug, Deserialize)]
pub struct GetDateArgs {
    /// IANA timezone name, e.g. `America/New_York`
    pub timezone: String,
}

/// Tool returning the current date and time in a timezone
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct GetDate;

/// Format `instant` as ISO-8601 local time in `timezone`
pub fn local_time(timezone: &str, instant: DateTime<Utc>) -> Result<String, ToolError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| ToolError::invalid_timezone(timezone))?;

    Ok(instant
        .with_timezone(&tz)
        .to_rfc3339_opts(SecondsFormat::Micros, false))
}

impl Tool for GetDate {
    const NAME: &'static str = "get_date";
    type Error = ToolError;
    type Args = GetDateArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Given timezone, returns date and time in that timezone".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "timezone": {
                        "type": "string",
                        "description": "The IANA timezone string, e.g., 'America/New_York'."
                    }
                },
                "required": ["timezone"],
                "additionalProperties": false
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        local_time(&args.timezone, Utc::now())
    }
}
