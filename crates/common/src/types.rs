//! Core types for GridRunner

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============ Capabilities ============

/// Browser family a grid node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl Default for BrowserFamily {
    fn default() -> Self {
        BrowserFamily::Chrome
    }
}

impl std::fmt::Display for BrowserFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserFamily::Chrome => write!(f, "chrome"),
            BrowserFamily::Firefox => write!(f, "firefox"),
            BrowserFamily::Edge => write!(f, "edge"),
            BrowserFamily::Safari => write!(f, "safari"),
        }
    }
}

impl std::str::FromStr for BrowserFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "chrome" => Ok(BrowserFamily::Chrome),
            "firefox" => Ok(BrowserFamily::Firefox),
            "edge" => Ok(BrowserFamily::Edge),
            "safari" => Ok(BrowserFamily::Safari),
            _ => Err(Error::InvalidConfig(format!("unknown browser family: {}", s))),
        }
    }
}

/// Operating system a grid node runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
    Macos,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Windows => write!(f, "windows"),
            Platform::Macos => write!(f, "macos"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::Macos),
            _ => Err(Error::InvalidConfig(format!("unknown platform: {}", s))),
        }
    }
}

/// Execution environment a test unit requires and a grid node offers.
///
/// A requirement pins the browser family and optionally a version and
/// platform; components left unpinned match anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub family: BrowserFamily,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl Capability {
    /// Create a capability pinning only the browser family
    pub fn new(family: BrowserFamily) -> Self {
        Self {
            family,
            version: None,
            platform: None,
        }
    }

    /// Pin a browser version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Pin a platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Whether a node offering this capability can serve `required`.
    ///
    /// Family must match exactly; version and platform only when the
    /// requirement pins them.
    pub fn satisfies(&self, required: &Capability) -> bool {
        if self.family != required.family {
            return false;
        }
        if let Some(version) = &required.version {
            if self.version.as_deref() != Some(version.as_str()) {
                return false;
            }
        }
        if let Some(platform) = &required.platform {
            if self.platform.as_ref() != Some(platform) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.family)?;
        if let Some(version) = &self.version {
            write!(f, "/{}", version)?;
        }
        if let Some(platform) = &self.platform {
            write!(f, "/{}", platform)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/').map(str::trim).filter(|p| !p.is_empty());
        let family = parts
            .next()
            .ok_or_else(|| Error::InvalidConfig(format!("empty capability: '{}'", s)))?
            .parse()?;
        let mut capability = Capability::new(family);
        for part in parts {
            // a segment is a platform when it parses as one, a version otherwise
            match part.parse::<Platform>() {
                Ok(platform) => capability.platform = Some(platform),
                Err(_) => capability.version = Some(part.to_string()),
            }
        }
        Ok(capability)
    }
}

// ============ Test Units ============

/// A single scripted browser action, interpreted by the execution runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a URL
    Navigate { url: String },
    /// Click an element
    Click { selector: String },
    /// Fill an input field
    Fill { selector: String, value: String },
    /// Wait for an element to appear
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },
    /// Assert on an element's text or visibility
    Assert {
        selector: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        visible: Option<bool>,
    },
    /// Capture a screenshot
    Screenshot { name: String },
    /// Pause for a fixed duration
    Sleep { ms: u64 },
}

fn default_wait_timeout() -> u64 {
    5000
}

impl TestStep {
    /// Short label used in logs and attempt transcripts
    pub fn label(&self) -> String {
        match self {
            TestStep::Navigate { url } => format!("navigate {}", url),
            TestStep::Click { selector } => format!("click {}", selector),
            TestStep::Fill { selector, .. } => format!("fill {}", selector),
            TestStep::Wait { selector, .. } => format!("wait {}", selector),
            TestStep::Assert { selector, .. } => format!("assert {}", selector),
            TestStep::Screenshot { name } => format!("screenshot {}", name),
            TestStep::Sleep { ms } => format!("sleep {}ms", ms),
        }
    }

    /// The locator or target the step operates on, if it has one
    pub fn target(&self) -> Option<&str> {
        match self {
            TestStep::Navigate { url } => Some(url),
            TestStep::Click { selector } => Some(selector),
            TestStep::Fill { selector, .. } => Some(selector),
            TestStep::Wait { selector, .. } => Some(selector),
            TestStep::Assert { selector, .. } => Some(selector),
            TestStep::Screenshot { name } => Some(name),
            TestStep::Sleep { .. } => None,
        }
    }
}

/// A test to execute: required capability, ordered steps, and optional
/// per-unit overrides. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestUnit {
    pub id: String,
    pub name: String,
    pub capability: Capability,
    pub steps: Vec<TestStep>,
    /// Retry budget override; the orchestrator default applies when unset
    #[serde(default)]
    pub max_retry: Option<u32>,
    /// Per-attempt deadline override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TestUnit {
    pub fn new(name: impl Into<String>, capability: Capability, steps: Vec<TestStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            capability,
            steps,
            max_retry: None,
            timeout_ms: None,
        }
    }

    /// Override the retry budget for this unit
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// Override the per-attempt deadline for this unit
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Submit-time validation. A rejected unit never reaches the queue.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Validation {
                unit: self.name.clone(),
                reason: "step sequence is empty".to_string(),
            });
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::Validation {
                unit: self.name.clone(),
                reason: "timeout override must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============ Sessions ============

/// Lifecycle status of a pooled session, owned by the session pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    Draining,
    Dead,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Busy => write!(f, "busy"),
            SessionStatus::Draining => write!(f, "draining"),
            SessionStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A remote browser session on a grid node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    pub capability: Capability,
    /// Node endpoint the session lives on, e.g. `grid://eu-1:4444`
    pub endpoint: String,
}

impl SessionHandle {
    pub fn new(capability: Capability, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            capability,
            endpoint: endpoint.into(),
        }
    }
}

// ============ Attempts and Results ============

/// Terminal outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Passed,
    Failed,
    Errored,
    TimedOut,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Passed => write!(f, "passed"),
            AttemptOutcome::Failed => write!(f, "failed"),
            AttemptOutcome::Errored => write!(f, "errored"),
            AttemptOutcome::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "passed" => Ok(AttemptOutcome::Passed),
            "failed" => Ok(AttemptOutcome::Failed),
            "errored" => Ok(AttemptOutcome::Errored),
            "timed_out" => Ok(AttemptOutcome::TimedOut),
            _ => Err(Error::InvalidConfig(format!("unknown outcome: {}", s))),
        }
    }
}

/// How the retry controller classified a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Likely environmental; worth retrying on a fresh session
    Transient,
    /// A real test failure; retrying cannot change it
    Terminal,
    /// The session itself is gone or unusable
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Terminal => write!(f, "terminal"),
            FailureKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Classified failure recorded on an attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Kind of artifact captured during an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Log,
}

/// Reference to an artifact written during an attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: String,
    pub sha256: String,
}

/// One execution of a test unit against one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub unit_id: String,
    /// 1-based attempt number
    pub number: u32,
    pub session_id: String,
    /// Epoch milliseconds
    pub started_at: i64,
    /// Epoch milliseconds
    pub finished_at: i64,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub failure: Option<FailureDetail>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

impl ExecutionAttempt {
    pub fn duration_ms(&self) -> i64 {
        self.finished_at - self.started_at
    }
}

/// Aggregated outcome for a test unit across all of its attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub unit_id: String,
    pub name: String,
    pub capability: Capability,
    /// Attempts in execution order; never empty for a recorded result
    pub attempts: Vec<ExecutionAttempt>,
    /// Epoch seconds
    pub completed_at: i64,
}

impl TestResult {
    pub fn new(unit: &TestUnit, attempts: Vec<ExecutionAttempt>) -> Self {
        Self {
            unit_id: unit.id.clone(),
            name: unit.name.clone(),
            capability: unit.capability.clone(),
            attempts,
            completed_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Final status is the outcome of the last attempt
    pub fn final_status(&self) -> AttemptOutcome {
        self.attempts
            .last()
            .map(|a| a.outcome)
            .unwrap_or(AttemptOutcome::Errored)
    }

    /// Retries consumed beyond the first attempt
    pub fn retry_count(&self) -> u32 {
        self.attempts.len().saturating_sub(1) as u32
    }

    /// Wall-clock span from first attempt start to last attempt finish
    pub fn duration_ms(&self) -> i64 {
        match (self.attempts.first(), self.attempts.last()) {
            (Some(first), Some(last)) => last.finished_at - first.started_at,
            _ => 0,
        }
    }
}

// ============ Dispatch State ============

/// Dispatch state machine position for a submitted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Queued,
    Dispatched,
    Executing,
    Retrying,
    /// No matching session within the acquire timeout
    Unavailable,
    Completed(AttemptOutcome),
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Queued => write!(f, "queued"),
            UnitState::Dispatched => write!(f, "dispatched"),
            UnitState::Executing => write!(f, "executing"),
            UnitState::Retrying => write!(f, "retrying"),
            UnitState::Unavailable => write!(f, "unavailable"),
            UnitState::Completed(outcome) => write!(f, "completed ({})", outcome),
        }
    }
}
