use obrolan_domain::DomainResult;
use obrolan_domain::error::{DomainError, FieldError};
use obrolan_domain::messages::{Attachment, AttachmentKind};
use obrolan_domain::util::is_valid_id;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPayload {
    pub chat_id: String,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPayload {
    pub chat_id: String,
    pub up_to: Option<String>,
}

/// `chat:join` and `chat:leave` accept either a bare id or `{"chat_id": ..}`.
pub fn parse_chat_ref(data: &Value) -> DomainResult<String> {
    let raw = match data {
        Value::Object(fields) => fields.get("chat_id").unwrap_or(&Value::Null),
        other => other,
    };
    let mut errors = Vec::new();
    let chat_id = check_id("chat_id", raw, &mut errors);
    finish(errors)?;
    Ok(chat_id.unwrap_or_default())
}

pub fn parse_send(data: &Value) -> DomainResult<SendPayload> {
    let fields = expect_object(data)?;
    let mut errors = Vec::new();
    let chat_id = check_id("chat_id", field(fields, "chat_id"), &mut errors);

    let content = match field(fields, "content") {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => {
            errors.push(
                FieldError::new("content", "content must be a string").with_value(other.clone()),
            );
            None
        }
    };
    let attachment = match field(fields, "attachment") {
        Value::Null => None,
        Value::Object(attachment) => check_attachment(attachment, &mut errors),
        other => {
            errors.push(
                FieldError::new("attachment", "attachment must be an object")
                    .with_value(other.clone()),
            );
            None
        }
    };

    let has_content = content.as_deref().is_some_and(|text| !text.trim().is_empty());
    let has_attachment = !field(fields, "attachment").is_null();
    if has_content == has_attachment {
        errors.push(FieldError::new(
            "content",
            "exactly one of content or attachment is required",
        ));
    }

    finish(errors)?;
    Ok(SendPayload {
        chat_id: chat_id.unwrap_or_default(),
        content,
        attachment,
    })
}

pub fn parse_read(data: &Value) -> DomainResult<ReadPayload> {
    let fields = expect_object(data)?;
    let mut errors = Vec::new();
    let chat_id = check_id("chat_id", field(fields, "chat_id"), &mut errors);
    let up_to = match field(fields, "up_to") {
        Value::Null => None,
        raw => check_id("up_to", raw, &mut errors),
    };
    finish(errors)?;
    Ok(ReadPayload {
        chat_id: chat_id.unwrap_or_default(),
        up_to,
    })
}

fn check_attachment(
    fields: &Map<String, Value>,
    errors: &mut Vec<FieldError>,
) -> Option<Attachment> {
    let kind = match field(fields, "kind") {
        Value::String(kind) => AttachmentKind::parse(kind),
        _ => None,
    };
    if kind.is_none() {
        let allowed: Vec<&str> = AttachmentKind::ALL.iter().map(AttachmentKind::as_str).collect();
        errors.push(
            FieldError::new(
                "attachment.kind",
                format!("attachment kind must be one of {}", allowed.join(", ")),
            )
            .with_value(field(fields, "kind").clone()),
        );
    }

    let mut text = |name: &str| match field(fields, name) {
        Value::Null => None,
        Value::String(value) => Some(value.clone()),
        other => {
            errors.push(
                FieldError::new(format!("attachment.{name}"), format!("{name} must be a string"))
                    .with_value(other.clone()),
            );
            None
        }
    };
    let url = text("url");
    let name = text("name");

    let size_bytes = match field(fields, "size_bytes") {
        Value::Null => None,
        raw => match raw.as_u64() {
            Some(size) => Some(size),
            None => {
                errors.push(
                    FieldError::new(
                        "attachment.size_bytes",
                        "size_bytes must be a non-negative integer",
                    )
                    .with_value(raw.clone()),
                );
                None
            }
        },
    };

    kind.map(|kind| Attachment {
        kind,
        url,
        name,
        size_bytes,
    })
}

fn check_id(name: &str, raw: &Value, errors: &mut Vec<FieldError>) -> Option<String> {
    match raw {
        Value::String(id) if is_valid_id(id) => Some(id.clone()),
        Value::Null => {
            errors.push(FieldError::new(name, format!("{name} is required")));
            None
        }
        other => {
            errors.push(
                FieldError::new(name, format!("invalid {}", name.replace('_', " ")))
                    .with_value(other.clone()),
            );
            None
        }
    }
}

fn expect_object(data: &Value) -> DomainResult<&Map<String, Value>> {
    data.as_object()
        .ok_or_else(|| DomainError::invalid("data", "payload must be an object"))
}

fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> &'a Value {
    fields.get(name).unwrap_or(&Value::Null)
}

fn finish(errors: Vec<FieldError>) -> DomainResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}
