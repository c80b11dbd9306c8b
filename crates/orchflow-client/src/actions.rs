//! Orchestrator action vocabulary and well-known event names.
//!
//! Actions travel as the `action` member of an `execute` call and are
//! internally tagged by `type`:
//!
//! ```json
//! {"method": "execute", "params": {"action": {"type": "run_command", "pane_id": "p1", "command": "cargo test"}}}
//! ```

use serde::{Deserialize, Serialize};

/// Method name used for every action.
pub const EXECUTE_METHOD: &str = "execute";

/// Method name of the fire-and-forget subscription request.
pub const SUBSCRIBE_METHOD: &str = "subscribe";

/// Kind of pane to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneType {
    /// Interactive shell.
    Terminal,
    /// Text editor.
    Editor,
    /// File browser.
    FileTree,
    /// Read-only output view.
    Output,
}

/// A request for the orchestrator to do something.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Start a new session.
    CreateSession {
        /// Session name.
        name: String,
    },
    /// Open a pane inside a session.
    CreatePane {
        /// Owning session.
        session_id: String,
        /// What the pane shows.
        pane_type: PaneType,
        /// Command to start in the pane.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Run a shell command in a terminal pane.
    RunCommand {
        /// Target pane.
        pane_id: String,
        /// Command line.
        command: String,
    },
    /// Type raw input into a pane.
    SendInput {
        /// Target pane.
        pane_id: String,
        /// Keys or text to send.
        input: String,
    },
    /// Read back pane output.
    GetOutput {
        /// Target pane.
        pane_id: String,
        /// Only the last `lines` lines.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lines: Option<u32>,
    },
    /// Close a pane.
    ClosePane {
        /// Target pane.
        pane_id: String,
    },
    /// Give a pane focus.
    FocusPane {
        /// Target pane.
        pane_id: String,
    },
    /// Open a file in an editor pane.
    OpenFile {
        /// File path.
        path: String,
    },
    /// Write a file, optionally replacing its content.
    SaveFile {
        /// File path.
        path: String,
        /// New content; `None` saves the editor buffer as-is.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Persist a session.
    SaveSession {
        /// Session to save.
        session_id: String,
        /// Name to save it under.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Action {
    /// Wire tag of this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::CreatePane { .. } => "create_pane",
            Self::RunCommand { .. } => "run_command",
            Self::SendInput { .. } => "send_input",
            Self::GetOutput { .. } => "get_output",
            Self::ClosePane { .. } => "close_pane",
            Self::FocusPane { .. } => "focus_pane",
            Self::OpenFile { .. } => "open_file",
            Self::SaveFile { .. } => "save_file",
            Self::SaveSession { .. } => "save_session",
        }
    }
}

// ── Event types ─────────────────────────────────────────────────────────────

/// A session was created.
pub const SESSION_CREATED: &str = "session_created";
/// A session was deleted.
pub const SESSION_DELETED: &str = "session_deleted";
/// A pane was created.
pub const PANE_CREATED: &str = "pane_created";
/// A pane produced output (`pane_id`, `data`).
pub const PANE_OUTPUT: &str = "pane_output";
/// A pane was closed.
pub const PANE_CLOSED: &str = "pane_closed";
/// A pane gained focus.
pub const PANE_FOCUSED: &str = "pane_focused";
/// A command started running (`pane_id`, `command`).
pub const COMMAND_EXECUTED: &str = "command_executed";
/// A command finished (`pane_id`, `exit_code`).
pub const COMMAND_COMPLETED: &str = "command_completed";
/// A file was opened (`path`, `pane_id`).
pub const FILE_OPENED: &str = "file_opened";
/// A file was saved (`path`).
pub const FILE_SAVED: &str = "file_saved";
/// A watched file changed on disk (`path`).
pub const FILE_CHANGED: &str = "file_changed";

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
