use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Rejection carrying every failed field at once, so a form can mark all of
/// them in a single round trip. `fields` maps field name to a user-facing
/// message.
pub fn validation_err(id: &str, fields: serde_json::Value) -> serde_json::Value {
    err(
        id,
        "validation_error",
        "submission failed validation",
        Some(json!({ "fields": fields })),
    )
}
