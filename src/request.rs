//! Incoming certificate requests and the transport-shaped response.

use serde::{Deserialize, Serialize};

use crate::error::{CertificateError, FieldProblem, ValidationError};

/// Fixed acknowledgement returned on every successful issue.
pub const SUCCESS_MESSAGE: &str = "Certificado gerado com sucesso";

const MAX_ID_LEN: usize = 128;
const MAX_TEXT_LEN: usize = 256;

/// Request body as decoded from JSON. Nothing is trusted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
}

/// A request that passed validation; fields are trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub id: String,
    pub name: String,
    pub grade: String,
}

/// Decode a JSON request body.
pub fn parse_request(body: &str) -> Result<CertificateRequest, ValidationError> {
    serde_json::from_str(body)
        .map_err(|e| ValidationError::single("body", format!("is not valid JSON: {e}")))
}

impl CertificateRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, grade: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            grade: Some(grade.into()),
        }
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> Result<ValidRequest, ValidationError> {
        let mut problems = Vec::new();

        let id = required("id", self.id.as_deref(), MAX_ID_LEN, &mut problems);
        if let Some(id) = id {
            if id.starts_with('.') {
                problems.push(FieldProblem {
                    field: "id",
                    reason: "must not start with '.'".into(),
                });
            } else if !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            {
                problems.push(FieldProblem {
                    field: "id",
                    reason: "may only contain letters, digits, '.', '_' and '-'".into(),
                });
            }
        }
        let name = required("name", self.name.as_deref(), MAX_TEXT_LEN, &mut problems);
        let grade = required("grade", self.grade.as_deref(), MAX_TEXT_LEN, &mut problems);

        match (id, name, grade) {
            (Some(id), Some(name), Some(grade)) if problems.is_empty() => Ok(ValidRequest {
                id: id.to_string(),
                name: name.to_string(),
                grade: grade.to_string(),
            }),
            _ => Err(ValidationError { problems }),
        }
    }
}

fn required<'a>(
    field: &'static str,
    value: Option<&'a str>,
    max_len: usize,
    problems: &mut Vec<FieldProblem>,
) -> Option<&'a str> {
    let Some(raw) = value else {
        problems.push(FieldProblem {
            field,
            reason: "is required".into(),
        });
        return None;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        problems.push(FieldProblem {
            field,
            reason: "must not be blank".into(),
        });
        return None;
    }
    if trimmed.chars().count() > max_len {
        problems.push(FieldProblem {
            field,
            reason: format!("must be at most {max_len} characters"),
        });
        return None;
    }
    Some(trimmed)
}

/// Proxy-style response handed back to the entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    /// JSON-encoded body.
    pub body: String,
}

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

impl ApiResponse {
    pub fn created() -> Self {
        Self {
            status_code: 201,
            body: encode_body(SUCCESS_MESSAGE, None),
        }
    }

    pub fn failure(error: &CertificateError) -> Self {
        Self {
            status_code: error.status_code(),
            body: encode_body(&error.to_string(), Some(error.code())),
        }
    }

    /// The `message` field of the body, if it decodes.
    pub fn message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.get("message")?.as_str().map(str::to_string)
    }

    /// The `code` field of an error body.
    pub fn code(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.get("code")?.as_str().map(str::to_string)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

fn encode_body(message: &str, code: Option<&str>) -> String {
    serde_json::to_string(&MessageBody { message, code }).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_trims_a_complete_request() {
        let req = parse_request(r#"{"id":" 123 ","name":"Maria","grade":"B","extra":1}"#).unwrap();
        let valid = req.validate().unwrap();
        assert_eq!(valid.id, "123");
        assert_eq!(valid.name, "Maria");
        assert_eq!(valid.grade, "B");
    }

    #[test]
    fn reports_every_missing_field() {
        let err = parse_request(r#"{"name":"   "}"#).unwrap().validate().unwrap_err();
        assert!(err.mentions("id"));
        assert!(err.mentions("name"));
        assert!(err.mentions("grade"));
    }

    #[test]
    fn rejects_ids_unsafe_as_storage_keys() {
        for id in ["../etc", "a/b", ".hidden", "sp ace"] {
            let err = CertificateRequest::new(id, "Ada", "A").validate().unwrap_err();
            assert!(err.mentions("id"), "id {id:?} should be rejected");
        }
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let err = parse_request("{not json").unwrap_err();
        assert!(err.mentions("body"));
    }

    #[test]
    fn created_response_carries_fixed_message() {
        let resp = ApiResponse::created();
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.message().as_deref(), Some(SUCCESS_MESSAGE));
        assert_eq!(resp.code(), None);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["statusCode"], 201);
    }
}
