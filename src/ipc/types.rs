use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line of input: `{"id", "method", "params"?}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The open workspace, if any. Data methods answer `no_workspace` until
/// `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
