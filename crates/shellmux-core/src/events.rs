// shellmux event protocol.
//
// Every frame is `{ "event": "<kebab-case name>", "payload": { ... } }`.
// Payload fields are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Default terminal width when `create-terminal` omits `cols`.
pub const DEFAULT_COLS: u16 = 80;
/// Default terminal height when `create-terminal` omits `rows`.
pub const DEFAULT_ROWS: u16 = 24;

/// Events sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    BeginSession(BeginSessionPayload),
    EndSession(EmptyPayload),
    CreateTerminal(CreateTerminalPayload),
    TerminalInput(TerminalInputPayload),
    ResizeTerminal(ResizeTerminalPayload),
    CloseTerminal(CloseTerminalPayload),
    RenameTerminal(RenameTerminalPayload),
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginSession(_) => "begin-session",
            Self::EndSession(_) => "end-session",
            Self::CreateTerminal(_) => "create-terminal",
            Self::TerminalInput(_) => "terminal-input",
            Self::ResizeTerminal(_) => "resize-terminal",
            Self::CloseTerminal(_) => "close-terminal",
            Self::RenameTerminal(_) => "rename-terminal",
        }
    }
}

/// Events sent by the server to the attached client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    SessionCreated(SessionCreatedPayload),
    SessionResumed(SessionResumedPayload),
    SessionSuperseded(SessionSupersededPayload),
    SessionEnded(SessionEndedPayload),
    TerminalBuffered(TerminalDataPayload),
    TerminalReady(TerminalReadyPayload),
    TerminalError(ErrorPayload),
    TerminalData(TerminalDataPayload),
    TerminalExit(TerminalExitPayload),
    Error(ErrorPayload),
    Shutdown(ShutdownPayload),
}

impl ServerEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionCreated(_) => "session-created",
            Self::SessionResumed(_) => "session-resumed",
            Self::SessionSuperseded(_) => "session-superseded",
            Self::SessionEnded(_) => "session-ended",
            Self::TerminalBuffered(_) => "terminal-buffered",
            Self::TerminalReady(_) => "terminal-ready",
            Self::TerminalError(_) => "terminal-error",
            Self::TerminalData(_) => "terminal-data",
            Self::TerminalExit(_) => "terminal-exit",
            Self::Error(_) => "error",
            Self::Shutdown(_) => "shutdown",
        }
    }

    /// Build a `terminal-error` reply.
    pub fn terminal_error(message: impl Into<String>) -> Self {
        Self::TerminalError(ErrorPayload {
            message: message.into(),
        })
    }

    /// Build a generic `error` reply.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

// ── Inbound payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputPayload {
    pub terminal_id: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeTerminalPayload {
    pub terminal_id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTerminalPayload {
    pub terminal_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameTerminalPayload {
    pub terminal_id: String,
    /// `None` or an empty string clears the label.
    #[serde(default)]
    pub custom_name: Option<String>,
}

// ── Outbound payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumedPayload {
    pub session_id: String,
    pub terminals: Vec<TerminalInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSupersededPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedPayload {
    pub session_id: String,
}

/// One entry of the terminal inventory sent on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub id: String,
    pub process_id: Option<u32>,
    pub tab_number: u32,
    pub custom_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalReadyPayload {
    pub terminal_id: String,
    pub process_id: Option<u32>,
    pub tab_number: u32,
}

/// Used by both `terminal-data` (live) and `terminal-buffered` (replay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalDataPayload {
    pub terminal_id: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitPayload {
    pub terminal_id: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub reason: String,
}
