/// Structured grading audit events
///
/// Every event is one JSON line on the `gradebox::audit` log target, with
/// correlation ids so a submission can be traced from request to record.
use crate::config::types::{Language, ResourceLimit, SubmissionStatus};
use chrono::{DateTime, Utc};
use log::Level;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "gradebox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GradingStarted,
    CaseLimitViolation,
    CaseRuntimeError,
    RunAborted,
    SubmissionRecorded,
    ProgressUpdated,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::GradingStarted => AuditSeverity::Low,
            AuditEventType::CaseLimitViolation => AuditSeverity::Medium,
            AuditEventType::CaseRuntimeError => AuditSeverity::Low,
            AuditEventType::RunAborted => AuditSeverity::High,
            AuditEventType::SubmissionRecorded => AuditSeverity::Low,
            AuditEventType::ProgressUpdated => AuditSeverity::Low,
        }
    }
}

/// Ids tying events of one grading run together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCorrelation {
    pub run_id: Uuid,
    pub student_id: Uuid,
    pub question_id: Uuid,
}

impl RunCorrelation {
    pub fn new(student_id: Uuid, question_id: Uuid) -> Self {
        RunCorrelation {
            run_id: Uuid::new_v4(),
            student_id,
            question_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<RunCorrelation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_number: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<ResourceLimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        AuditEvent {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation: None,
            language: None,
            case_number: None,
            limit: None,
            submission_id: None,
            status: None,
            score: None,
        }
    }

    pub fn with_correlation(mut self, correlation: RunCorrelation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// 1-based case number
    pub fn with_case(mut self, case_number: usize) -> Self {
        self.case_number = Some(case_number);
        self
    }

    pub fn with_limit(mut self, limit: ResourceLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_outcome(mut self, submission_id: Uuid, status: SubmissionStatus, score: u32) -> Self {
        self.submission_id = Some(submission_id);
        self.status = Some(status);
        self.score = Some(score);
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "event_type": self.event_type,
                "details": self.details,
            })
        })
    }
}

/// Emit an audit event on the audit target.
pub fn emit(event: AuditEvent) {
    let level = match event.severity {
        AuditSeverity::High => Level::Warn,
        AuditSeverity::Medium | AuditSeverity::Low => Level::Info,
    };
    log::log!(target: AUDIT_TARGET, level, "{}", event.to_json());
}
