use conveyor_core::TaskStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of `POST /enqueue`. Missing fields fall back to empty/zero and are
/// caught by `validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnqueueRequest {
    pub id: String,
    pub payload: String,
    pub max_retries: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("id, payload and max_retries are required")]
    MissingFields,

    #[error("max_retries must be greater than 0")]
    NonPositiveRetries,

    #[error("max_retries is too large")]
    RetriesTooLarge,
}

impl EnqueueRequest {
    /// Check the request and return `max_retries` narrowed to the core's type.
    pub fn validate(&self) -> Result<u32, ValidationError> {
        if self.id.is_empty() || self.payload.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        if self.max_retries < 1 {
            return Err(ValidationError::NonPositiveRetries);
        }
        u32::try_from(self.max_retries).map_err(|_| ValidationError::RetriesTooLarge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueResponse {
    pub id: String,
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request(id: &str, payload: &str, max_retries: i64) -> EnqueueRequest {
        EnqueueRequest {
            id: id.into(),
            payload: payload.into(),
            max_retries,
        }
    }

    #[rstest]
    #[case::no_id(request("", "p", 1), ValidationError::MissingFields)]
    #[case::no_payload(request("t1", "", 1), ValidationError::MissingFields)]
    #[case::missing_fields_win(request("", "", 0), ValidationError::MissingFields)]
    #[case::zero_retries(request("t1", "p", 0), ValidationError::NonPositiveRetries)]
    #[case::negative_retries(request("t1", "p", -3), ValidationError::NonPositiveRetries)]
    #[case::too_many_retries(request("t1", "p", i64::from(u32::MAX) + 1), ValidationError::RetriesTooLarge)]
    fn invalid_requests(#[case] req: EnqueueRequest, #[case] expected: ValidationError) {
        assert_eq!(req.validate(), Err(expected));
    }

    #[test]
    fn valid_request_yields_retries() {
        assert_eq!(request("t1", "p", 3).validate(), Ok(3));
    }

    #[test]
    fn missing_json_fields_default() {
        let req: EnqueueRequest = serde_json::from_str(r#"{"id":"t1"}"#).unwrap();
        assert_eq!(req, request("t1", "", 0));
    }

    #[test]
    fn response_status_is_lowercase() {
        let body = serde_json::to_value(EnqueueResponse {
            id: "t1".into(),
            status: TaskStatus::Queued,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"id": "t1", "status": "queued"}));
    }
}
