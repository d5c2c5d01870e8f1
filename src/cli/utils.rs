use serde_json::{json, Map, Value};

use crate::cli::OutputFormat;

/// Prints a completed command. JSON output merges `data` next to `message`.
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut body = Map::new();
            body.insert("status".into(), json!("ok"));
            body.insert("message".into(), json!(message));
            if let Some(Value::Object(extra)) = data {
                body.extend(extra);
            }
            println!("{}", serde_json::to_string_pretty(&Value::Object(body))?);
        }
        OutputFormat::Text => println!("✓ {}", message),
    }
    Ok(())
}

/// Prints a failure using the same `{"error", "code"}` shape as the HTTP API.
pub fn output_error(output_format: OutputFormat, message: &str, code: Option<&str>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let body = json!({
                "error": message,
                "code": code.unwrap_or("ERROR"),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => eprintln!("Error: {}", message),
    }
    Ok(())
}
