//! API Models
//!
//! Data structures returned by the REST API, annotated with `utoipa` for the
//! generated OpenAPI document.

use chrono::{DateTime, Utc};
use intake_core::state::SessionReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, example = "running")]
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Completed interviewer/subject exchanges so far.
    pub turns: u64,
}

/// A session with everything recorded in it so far.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    /// Transcript, full question history, consolidated diagnoses with
    /// severity and the working diagnosis pool.
    #[schema(value_type = Object)]
    pub report: SessionReport,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use intake_core::question::QuestionPoolConfig;
    use intake_core::state::AnalysisState;
    use intake_core::transcript::Speaker;

    #[test]
    fn test_session_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Completed).unwrap(),
            "\"completed\""
        );
        let failed: SessionStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(failed, SessionStatus::Failed);
    }

    #[test]
    fn test_session_status_display() {
        assert_eq!(format!("{}", SessionStatus::Running), "running");
        assert_eq!(format!("{}", SessionStatus::Failed), "failed");
    }

    #[test]
    fn test_invalid_status_deserialization() {
        let result: Result<SessionStatus, _> = serde_json::from_str("\"Paused\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_session_summary_serialization() {
        let started = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let summary = SessionSummary {
            id,
            status: SessionStatus::Running,
            started_at: started,
            ended_at: None,
            turns: 3,
        };

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("550e8400-e29b-41d4-a716-446655440000"));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"ended_at\":null"));

        let deserialized: SessionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, summary);
    }

    #[tokio::test]
    async fn test_session_detail_embeds_report() {
        let state = AnalysisState::new(QuestionPoolConfig::default());
        state
            .record_utterance(Speaker::Interviewer, "What brings you in today?")
            .await;
        let detail = SessionDetail {
            summary: SessionSummary {
                id: Uuid::new_v4(),
                status: SessionStatus::Completed,
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                turns: 0,
            },
            report: state.report().await,
        };

        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["summary"]["status"], "completed");
        assert_eq!(value["report"]["transcript"][0]["speaker"], "INTERVIEWER");
        assert!(value["report"]["questions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Session not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Session not found"}"#);
    }
}
