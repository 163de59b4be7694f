//! Event — closed message types for the real-time channel.
//!
//! DESIGN
//! ======
//! Every websocket message is one variant of a direction-specific enum:
//! clients send [`ClientEvent`], students receive [`StudentEvent`], and
//! supervisors receive [`SupervisorEvent`]. Connection-level events shared by
//! both roles live in [`ChannelEvent`]. An unhandled message shape is a
//! compile-time gap, not a runtime one.
//!
//! The per-connection outbound channel carries [`Outbound`], an untagged
//! union of the three server-to-client enums. Each inner enum is internally
//! tagged with `"event"`, so the wire format is always
//! `{"event": "...", ...fields}` in both directions.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// SHARED TYPES
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Role a connection announces when joining a test room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Supervisor,
}

/// Severity of a reported violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A structured integrity-breach signal raised during a monitored attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub violation_type: String,
    pub severity: Severity,
    pub description: String,
}

/// Which peer-media stream a negotiation message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Camera,
    Screen,
}

/// Public identity fields of a student, as shown on a supervisor's roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterStudent {
    pub connection_id: Uuid,
    pub student_id: Uuid,
    pub display_name: String,
    pub attempt_id: Uuid,
}

// =============================================================================
// CLIENT -> COORDINATOR
// =============================================================================

/// Messages a client may send over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinAsStudent {
        test_code: String,
        student_id: Uuid,
        display_name: String,
        attempt_id: Uuid,
    },
    JoinAsSupervisor {
        test_code: String,
        supervisor_id: Uuid,
        display_name: String,
    },
    /// Camera frame or telemetry sample, forwarded to the room supervisor.
    SendFrame {
        frame_base64: String,
        ts: i64,
    },
    /// Violation report from the student client. `score` is the client's
    /// cumulative-score contribution for this report; when omitted (or 0)
    /// the severity schedule decides.
    ReportViolation {
        violation_type: String,
        severity: Severity,
        #[serde(default)]
        score: u32,
        #[serde(default)]
        description: String,
    },
    SupervisorAdmit {
        student_id: Uuid,
    },
    SupervisorPause {
        student_id: Uuid,
    },
    SupervisorTerminate {
        student_id: Uuid,
    },
    /// Peer-media offer, student to current room supervisor.
    PeerOffer {
        sdp: String,
        stream: StreamKind,
    },
    /// Peer-media answer, supervisor to an explicit student connection.
    PeerAnswer {
        target: Uuid,
        sdp: String,
        stream: StreamKind,
    },
    /// ICE candidate. Students omit `target` (routed to the supervisor);
    /// supervisors must set it.
    PeerCandidate {
        #[serde(default)]
        target: Option<Uuid>,
        candidate: String,
        stream: StreamKind,
    },
}

// =============================================================================
// COORDINATOR -> STUDENT
// =============================================================================

/// Delivery events addressed to a student connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StudentEvent {
    Joined {
        test_code: String,
    },
    /// The student crossed the violation threshold and must wait for a
    /// supervisor decision.
    WaitingRoom {
        reason: String,
        violation_score: u32,
    },
    /// Supervisor admitted the student; the client resumes answering.
    Resumed,
    /// Supervisor paused the student; the client suspends answering.
    Suspended,
    /// One-way termination notice. The channel is expected to close.
    Terminated {
        reason: String,
    },
    PeerAnswer {
        sdp: String,
        stream: StreamKind,
    },
    PeerCandidate {
        candidate: String,
        stream: StreamKind,
    },
}

// =============================================================================
// COORDINATOR -> SUPERVISOR
// =============================================================================

/// Delivery events addressed to a supervisor connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    MonitoringStarted {
        test_code: String,
        students: Vec<RosterStudent>,
    },
    PeerJoined {
        student: RosterStudent,
    },
    PeerLeft {
        student_id: Uuid,
        display_name: String,
    },
    StudentFrame {
        connection_id: Uuid,
        student_id: Uuid,
        display_name: String,
        frame_base64: String,
        ts: i64,
    },
    StudentViolation {
        connection_id: Uuid,
        student_id: Uuid,
        display_name: String,
        violation: Violation,
        score: u32,
    },
    /// A waiting-room entry was created or changed state.
    WaitingRoomUpdate {
        test_code: String,
        student_id: Uuid,
        state: String,
        violation_score: u32,
    },
    PeerOffer {
        connection_id: Uuid,
        student_id: Uuid,
        display_name: String,
        sdp: String,
        stream: StreamKind,
    },
    PeerCandidate {
        connection_id: Uuid,
        candidate: String,
        stream: StreamKind,
    },
}

// =============================================================================
// CONNECTION-LEVEL EVENTS
// =============================================================================

/// Events shared by both roles: handshake and structured errors.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    Connected {
        connection_id: Uuid,
    },
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl ChannelEvent {
    /// Build a structured error event from a plain message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { code: code.into(), message: message.into(), retryable: false }
    }

    /// Build a structured error event from a typed error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
        }
    }
}

// =============================================================================
// OUTBOUND UNION
// =============================================================================

/// Payload of a connection's outbound channel. Untagged: each inner enum is
/// already internally tagged with `"event"`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Channel(ChannelEvent),
    Student(StudentEvent),
    Supervisor(SupervisorEvent),
}

impl From<ChannelEvent> for Outbound {
    fn from(ev: ChannelEvent) -> Self {
        Self::Channel(ev)
    }
}

impl From<StudentEvent> for Outbound {
    fn from(ev: StudentEvent) -> Self {
        Self::Student(ev)
    }
}

impl From<SupervisorEvent> for Outbound {
    fn from(ev: SupervisorEvent) -> Self {
        Self::Supervisor(ev)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
