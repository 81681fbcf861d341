//! Data model for plans, tasks, workers, sub-tasks, and bus messages.
//!
//! Every enum here follows the same hand-written pattern: a small `Copy`
//! enum, a `Display` impl producing the wire string, and a `FromStr` impl
//! returning a dedicated parse-error type. There is no ORM layer underneath
//! these types -- they are serialized directly to the two JSON state files
//! described in the external interfaces.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------
// Id newtypes
// ---------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(PlanId);
string_id!(TaskId);
string_id!(WorkerId);
string_id!(SubTaskId);
string_id!(MessageId);

/// Generate a `subtask-<8 hex chars>` id.
pub fn new_subtask_id() -> SubTaskId {
    SubTaskId(format!(
        "subtask-{}",
        &Uuid::new_v4().simple().to_string()[..8]
    ))
}

pub fn new_message_id() -> MessageId {
    MessageId(Uuid::new_v4().to_string())
}

pub fn new_worker_id() -> WorkerId {
    WorkerId(Uuid::new_v4().to_string())
}

// ---------------------------------------------------------------------
// Enum pattern: Display + FromStr + dedicated ParseError
// ---------------------------------------------------------------------

/// Error returned when parsing a wire string into one of this module's
/// enums fails. Carries the offending input for a useful message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.type_name, self.input)
    }
}

impl std::error::Error for EnumParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Active => "active",
            PlanStatus::Paused => "paused",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PlanStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PlanStatus::Draft),
            "active" => Ok(PlanStatus::Active),
            "paused" => Ok(PlanStatus::Paused),
            "completed" => Ok(PlanStatus::Completed),
            "failed" => Ok(PlanStatus::Failed),
            _ => Err(EnumParseError {
                type_name: "PlanStatus",
                input: s.to_string(),
            }),
        }
    }
}

/// Task/SubTask state, validated against the transition table in
/// `conclave_core::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
            TaskState::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskState {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "cancelled" => Ok(TaskState::Cancelled),
            "blocked" => Ok(TaskState::Blocked),
            _ => Err(EnumParseError {
                type_name: "TaskState",
                input: s.to_string(),
            }),
        }
    }
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Queued | TaskState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Higher rank dequeues first: critical > high > normal > low.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Priority {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(EnumParseError {
                type_name: "Priority",
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Idle,
    WaitingApproval,
    Paused,
    Completed,
    Error,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Idle => "idle",
            WorkerStatus::WaitingApproval => "waiting-approval",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkerStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(WorkerStatus::Running),
            "idle" => Ok(WorkerStatus::Idle),
            "waiting-approval" => Ok(WorkerStatus::WaitingApproval),
            "paused" => Ok(WorkerStatus::Paused),
            "completed" => Ok(WorkerStatus::Completed),
            "error" => Ok(WorkerStatus::Error),
            _ => Err(EnumParseError {
                type_name: "WorkerStatus",
                input: s.to_string(),
            }),
        }
    }
}

/// The lineage origin of a sub-task; governs `maxDepth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnContext {
    Orchestrator,
    Agent,
}

impl fmt::Display for SpawnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpawnContext::Orchestrator => "orchestrator",
            SpawnContext::Agent => "agent",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SpawnContext {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orchestrator" => Ok(SpawnContext::Orchestrator),
            // "subtask" is an alias for "agent".
            "agent" | "subtask" => Ok(SpawnContext::Agent),
            _ => Err(EnumParseError {
                type_name: "SpawnContext",
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Orchestrator,
    Worker,
    Agent,
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnerType::Orchestrator => "orchestrator",
            OwnerType::Worker => "worker",
            OwnerType::Agent => "agent",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OwnerType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orchestrator" => Ok(OwnerType::Orchestrator),
            "worker" => Ok(OwnerType::Worker),
            "agent" => Ok(OwnerType::Agent),
            _ => Err(EnumParseError {
                type_name: "OwnerType",
                input: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    StatusUpdate,
    PermissionRequest,
    PermissionResponse,
    Question,
    Completion,
    Error,
    Answer,
    Refinement,
    RetryRequest,
    ApprovalRequest,
    ApprovalResponse,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::StatusUpdate => "status_update",
            MessageType::PermissionRequest => "permission_request",
            MessageType::PermissionResponse => "permission_response",
            MessageType::Question => "question",
            MessageType::Completion => "completion",
            MessageType::Error => "error",
            MessageType::Answer => "answer",
            MessageType::Refinement => "refinement",
            MessageType::RetryRequest => "retry_request",
            MessageType::ApprovalRequest => "approval_request",
            MessageType::ApprovalResponse => "approval_response",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MessageType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "status_update" => MessageType::StatusUpdate,
            "permission_request" => MessageType::PermissionRequest,
            "permission_response" => MessageType::PermissionResponse,
            "question" => MessageType::Question,
            "completion" => MessageType::Completion,
            "error" => MessageType::Error,
            "answer" => MessageType::Answer,
            "refinement" => MessageType::Refinement,
            "retry_request" => MessageType::RetryRequest,
            "approval_request" => MessageType::ApprovalRequest,
            "approval_response" => MessageType::ApprovalResponse,
            _ => {
                return Err(EnumParseError {
                    type_name: "MessageType",
                    input: s.to_string(),
                });
            }
        })
    }
}

/// Backend a parsed agent-type string routes to. See the `agent_type` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    Copilot,
    Claude,
    Cli,
    Cloud,
}

impl fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentBackend::Copilot => "copilot",
            AgentBackend::Claude => "claude",
            AgentBackend::Cli => "cli",
            AgentBackend::Cloud => "cloud",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentBackend {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copilot" => Ok(AgentBackend::Copilot),
            "claude" => Ok(AgentBackend::Claude),
            "cli" => Ok(AgentBackend::Cli),
            "cloud" => Ok(AgentBackend::Cloud),
            _ => Err(EnumParseError {
                type_name: "AgentBackend",
                input: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------
// Aggregate records
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub base_branch: Option<String>,
    pub status: PlanStatus,
}

/// One accepted or rejected transition, kept on the owning Task/SubTask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub dependencies: Vec<TaskId>,
    pub plan_id: Option<PlanId>,
    pub base_branch: Option<String>,
    pub model_id: Option<String>,
    pub agent_type: Option<String>,
    pub target_files: Vec<String>,
    pub state: TaskState,
    pub error_message: Option<String>,
    pub parent_worker_id: Option<WorkerId>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub id: String,
    pub description: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub task_ref: TaskId,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: WorkerStatus,
    #[serde(default)]
    pub messages: Vec<MessageId>,
    #[serde(default)]
    pub pending_approvals: Vec<PendingApproval>,
    pub parent_worker_id: Option<WorkerId>,
    pub plan_id: Option<PlanId>,
    pub depth: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskResultKind {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskResult {
    pub kind: SubTaskResultKind,
    pub message: String,
    pub commit_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedAgentType {
    pub backend: AgentBackend,
    pub agent_name: String,
    pub slash_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub id: SubTaskId,
    pub parent_worker_id: WorkerId,
    pub parent_task_id: TaskId,
    pub plan_id: Option<PlanId>,
    pub worktree_path: PathBuf,
    pub base_branch: String,
    pub agent_type: String,
    pub parsed_agent_type: ParsedAgentType,
    pub prompt: String,
    pub expected_output: String,
    pub depth: u8,
    pub status: TaskState,
    pub target_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SubTaskResult>,
    pub spawn_context: SpawnContext,
    pub inherited_permissions: Option<Vec<String>>,
    pub parent_sub_task_id: Option<SubTaskId>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub session_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    pub plan_id: Option<PlanId>,
    pub task_id: Option<TaskId>,
    pub worker_id: Option<WorkerId>,
    pub worktree_path: Option<PathBuf>,
    pub parent_agent_id: Option<String>,
    pub sub_task_id: Option<SubTaskId>,
    pub depth: Option<u8>,
    pub owner: Option<Owner>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: serde_json::Value,
}

/// For cycle detection: the chain from a sub-task to the root must not
/// contain two entries with the same (agentType, promptHash).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestryEntry {
    pub sub_task_id: SubTaskId,
    pub parent_sub_task_id: Option<SubTaskId>,
    pub worker_id: WorkerId,
    pub plan_id: Option<PlanId>,
    pub agent_type: String,
    pub prompt_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_roundtrip() {
        for s in [
            PlanStatus::Draft,
            PlanStatus::Active,
            PlanStatus::Paused,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            let parsed: PlanStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn task_state_roundtrip_and_invalid() {
        let parsed: TaskState = "running".parse().unwrap();
        assert_eq!(parsed, TaskState::Running);
        assert!("bogus".parse::<TaskState>().is_err());
    }

    #[test]
    fn priority_rank_orders_critical_highest() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn task_state_terminal_and_active() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(TaskState::Queued.is_active());
        assert!(TaskState::Running.is_active());
        assert!(!TaskState::Pending.is_active());
    }

    #[test]
    fn spawn_context_subtask_aliases_to_agent() {
        assert_eq!(
            "subtask".parse::<SpawnContext>().unwrap(),
            SpawnContext::Agent
        );
    }
}
