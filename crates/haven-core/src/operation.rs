//! # Queued Operations
//!
//! The unit of work of the offline queue: one mutation waiting for delivery
//! to the remote service.
//!
//! ## Operation State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QueuedOperation Lifecycle                           │
//! │                                                                         │
//! │  ┌─────────┐  drain selects   ┌────────────┐   2xx     ┌───────────┐   │
//! │  │ Pending │ ──────────────► │ InProgress │ ────────► │ Completed │   │
//! │  └─────────┘                 └─────┬──────┘           └───────────┘   │
//! │                                    │  ▲                  (terminal)    │
//! │                 non-2xx / transport│  │ should_retry &&                 │
//! │                        error       ▼  │ selected again                  │
//! │                              ┌────────────┐                            │
//! │                              │   Failed   │  retry_count += 1          │
//! │                              └────────────┘                            │
//! │                                                                         │
//! │  • last_attempt_at is ONLY written by mark_in_progress                 │
//! │  • retry_count is ONLY incremented by mark_failed                      │
//! │  • Pending and Failed are the only resumable states                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Selection Order
//! `priority DESC, created_at ASC`: a high-priority check-in always goes
//! before a normal journal upload, and equal priorities go oldest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Operation Identifier
// =============================================================================

/// Opaque, immutable identifier of a queued operation (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        OperationId(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        OperationId(value.to_string())
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        OperationId(value)
    }
}

// =============================================================================
// HTTP Method
// =============================================================================

/// HTTP verb used to deliver an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Returns the canonical upper-case verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Operation Type
// =============================================================================

/// What kind of mutation an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Upload,
    Download,
}

impl OperationType {
    /// Maps the operation type onto the HTTP verb that delivers it.
    ///
    /// ```text
    /// create → POST   update → PUT   delete → DELETE
    /// upload → POST   download → GET
    /// ```
    pub fn http_method(&self) -> HttpMethod {
        match self {
            OperationType::Create | OperationType::Upload => HttpMethod::Post,
            OperationType::Update => HttpMethod::Put,
            OperationType::Delete => HttpMethod::Delete,
            OperationType::Download => HttpMethod::Get,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Upload => "upload",
            OperationType::Download => "download",
        };
        f.write_str(name)
    }
}

impl FromStr for OperationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            "upload" => Ok(OperationType::Upload),
            "download" => Ok(OperationType::Download),
            other => Err(CoreError::unknown(
                "operation type",
                other,
                "create, update, delete, upload, download",
            )),
        }
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Position of an operation in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for its first attempt.
    #[default]
    Pending,
    /// Request is in flight.
    InProgress,
    /// Delivered (2xx). Terminal.
    Completed,
    /// Last attempt failed; may be retried per the retry policy.
    Failed,
}

impl OperationStatus {
    /// Returns true for states a drain may pick up again.
    pub fn is_resumable(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::Failed)
    }

    /// Returns true for the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl FromStr for OperationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "in_progress" | "inprogress" | "in-progress" => Ok(OperationStatus::InProgress),
            "completed" | "done" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(CoreError::unknown(
                "operation status",
                other,
                "pending, in_progress, completed, failed",
            )),
        }
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Delivery priority. Declaration order defines `Ord`: `Low < Normal < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "default" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(CoreError::unknown("priority", other, "low, normal, high")),
        }
    }
}

// =============================================================================
// New Operation (enqueue request)
// =============================================================================

/// Everything a caller supplies when enqueuing. Built fluently:
///
/// ```rust
/// use haven_core::{NewOperation, OperationType, Priority};
///
/// let req = NewOperation::new(OperationType::Update, "/checkins/7")
///     .payload(br#"{"mood":"calm"}"#.to_vec())
///     .header("X-Client", "ios")
///     .priority(Priority::High);
/// assert_eq!(req.priority, Priority::High);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub op_type: OperationType,
    pub endpoint: String,
    pub payload: Option<Vec<u8>>,
    pub priority: Priority,
    pub headers: BTreeMap<String, String>,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
}

impl NewOperation {
    /// Starts a request with `Normal` priority and no payload.
    pub fn new(op_type: OperationType, endpoint: impl Into<String>) -> Self {
        NewOperation {
            op_type,
            endpoint: endpoint.into(),
            payload: None,
            priority: Priority::default(),
            headers: BTreeMap::new(),
            resource_id: None,
            resource_type: None,
        }
    }

    /// Sets the request body.
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the delivery priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds one request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces all request headers.
    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Attaches correlation identifiers for observability and caller-side dedup.
    pub fn resource(mut self, id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self.resource_type = Some(resource_type.into());
        self
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// A mutation waiting for (or being) delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique identifier, fixed at creation.
    pub id: OperationId,

    /// Mutation kind; decides the HTTP verb.
    #[serde(rename = "type")]
    pub op_type: OperationType,

    /// Remote resource or action, relative to the executor's base URL.
    pub endpoint: String,

    /// Request body (opaque to the queue).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,

    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// When the operation was enqueued. Never changes.
    pub created_at: DateTime<Utc>,

    /// Lifecycle state.
    pub status: OperationStatus,

    /// Failed attempts so far.
    pub retry_count: u32,

    /// Start of the most recent attempt.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Delivery priority.
    pub priority: Priority,

    /// Reason for the most recent failure.
    #[serde(default)]
    pub error_message: Option<String>,

    /// Correlation id of the domain object (journal, check-in, ...).
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Correlation type of the domain object.
    #[serde(default)]
    pub resource_type: Option<String>,
}

impl QueuedOperation {
    /// Creates a `Pending` operation with a fresh id.
    pub fn new(request: NewOperation, now: DateTime<Utc>) -> Self {
        QueuedOperation {
            id: OperationId::generate(),
            op_type: request.op_type,
            endpoint: request.endpoint,
            payload: request.payload,
            headers: request.headers,
            created_at: now,
            status: OperationStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
            priority: request.priority,
            error_message: None,
            resource_id: request.resource_id,
            resource_type: request.resource_type,
        }
    }

    /// Returns the HTTP verb for this operation.
    #[inline]
    pub fn http_method(&self) -> HttpMethod {
        self.op_type.http_method()
    }

    /// Records the start of an attempt.
    pub fn mark_in_progress(&mut self, now: DateTime<Utc>) {
        self.status = OperationStatus::InProgress;
        self.last_attempt_at = Some(now);
    }

    /// Records a successful delivery.
    pub fn mark_completed(&mut self) {
        self.status = OperationStatus::Completed;
        self.error_message = None;
    }

    /// Records a failed attempt.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.retry_count += 1;
        self.error_message = Some(error.into());
    }

    /// Puts an interrupted attempt back in line.
    ///
    /// Used when the persisted queue is reloaded and still contains
    /// `InProgress` entries: the process stopped before the attempt resolved,
    /// so it counts neither as success nor as failure.
    pub fn reset_interrupted(&mut self) {
        if self.status == OperationStatus::InProgress {
            self.status = OperationStatus::Pending;
        }
    }

    /// Selection order: higher priority first, then older first.
    pub fn selection_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn op(priority: Priority, created_at: DateTime<Utc>) -> QueuedOperation {
        QueuedOperation::new(
            NewOperation::new(OperationType::Create, "/journals").priority(priority),
            created_at,
        )
    }

    #[test]
    fn test_http_method_mapping() {
        assert_eq!(OperationType::Create.http_method(), HttpMethod::Post);
        assert_eq!(OperationType::Update.http_method(), HttpMethod::Put);
        assert_eq!(OperationType::Delete.http_method(), HttpMethod::Delete);
        assert_eq!(OperationType::Upload.http_method(), HttpMethod::Post);
        assert_eq!(OperationType::Download.http_method(), HttpMethod::Get);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_selection_order_priority_then_age() {
        let t0 = Utc::now();
        let low = op(Priority::Low, t0);
        let high = op(Priority::High, t0 + Duration::seconds(2));
        let normal_old = op(Priority::Normal, t0 + Duration::seconds(1));
        let normal_new = op(Priority::Normal, t0 + Duration::seconds(3));

        let mut ops = vec![low.clone(), normal_new.clone(), high.clone(), normal_old.clone()];
        ops.sort_by(|a, b| a.selection_order(b));

        let ids: Vec<_> = ops.iter().map(|o| o.id.clone()).collect();
        assert_eq!(ids, vec![high.id, normal_old.id, normal_new.id, low.id]);
    }

    #[test]
    fn test_state_transitions() {
        let now = Utc::now();
        let mut op = op(Priority::Normal, now);
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(op.last_attempt_at.is_none());

        op.mark_in_progress(now);
        assert_eq!(op.status, OperationStatus::InProgress);
        assert_eq!(op.last_attempt_at, Some(now));
        assert_eq!(op.retry_count, 0);

        op.mark_failed("HTTP 500");
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.error_message.as_deref(), Some("HTTP 500"));
        assert!(op.status.is_resumable());

        op.mark_in_progress(now);
        op.mark_completed();
        assert!(op.status.is_terminal());
        assert!(op.error_message.is_none());
        assert_eq!(op.retry_count, 1);
    }

    #[test]
    fn test_reset_interrupted_only_touches_in_progress() {
        let now = Utc::now();
        let mut op = op(Priority::Normal, now);
        op.mark_in_progress(now);
        op.reset_interrupted();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.last_attempt_at, Some(now));

        op.mark_failed("timeout");
        op.reset_interrupted();
        assert_eq!(op.status, OperationStatus::Failed);
    }

    #[test]
    fn test_json_shape() {
        let op = QueuedOperation::new(
            NewOperation::new(OperationType::Upload, "/voice-notes")
                .payload(vec![1, 2, 3])
                .resource("note-1", "voice_note"),
            Utc::now(),
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "upload");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["resourceType"], "voice_note");
        assert!(json.get("headers").is_none());

        let back: QueuedOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_parsing() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(
            "in_progress".parse::<OperationStatus>().unwrap(),
            OperationStatus::InProgress
        );
        assert_eq!("upload".parse::<OperationType>().unwrap(), OperationType::Upload);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
