use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::diff::{diff_json, index_by_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    Diffed,
}

/// NDJSON log of everything exchanged with the cloud.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, id: Uuid, action: &str, appliance_id: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "id": id.to_string(),
            "action": action,
            "appliance": appliance_id,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command_result(&mut self, id: Uuid, status: Option<u16>, error: Option<&str>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "ack",
            "id": id.to_string(),
            "status": status,
            "error": error,
        });
        self.write_line(&entry);
    }

    /// Fetch bodies are logged whole in `Full` mode. In `Diffed` mode the first
    /// body per endpoint is logged whole and later ones as per-record changes.
    pub fn log_fetch(&mut self, endpoint: &str, status: u16, body: &Value) {
        let ts = Utc::now().to_rfc3339();
        if self.mode == MessageLogMode::Full {
            let entry = json!({
                "ts": ts,
                "dir": "fetch",
                "endpoint": endpoint,
                "status": status,
                "body": body,
            });
            self.write_line(&entry);
            return;
        }

        let indexed = index_by_id(body);
        let entry = match self.previous.get(endpoint) {
            None => json!({
                "ts": ts,
                "dir": "fetch",
                "endpoint": endpoint,
                "status": status,
                "full": true,
                "body": body,
            }),
            Some(prev) => {
                let mut changes = Vec::new();
                diff_json(prev, &indexed, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": ts,
                    "dir": "fetch",
                    "endpoint": endpoint,
                    "status": status,
                    "changes": change_entries,
                })
            }
        };
        self.write_line(&entry);
        self.previous.insert(endpoint.to_string(), indexed);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("GET", "/1/devices", None);

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "GET");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn command_and_ack_share_id() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        let id = Uuid::new_v4();
        logger.log_command(id, "set_mode", "ac-1", &json!({"operation_mode": "warm"}));
        logger.log_command_result(id, Some(200), None);

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["appliance"], "ac-1");
        assert_eq!(lines[0]["action"], "set_mode");
        assert_eq!(lines[1]["dir"], "ack");
        assert_eq!(lines[0]["id"], lines[1]["id"]);
        assert_eq!(lines[1]["status"], 200);
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let body1 = json!([{"id": "ac-1", "settings": {"temp": "26"}}]);
        logger.log_fetch("/1/appliances", 200, &body1);
        let body2 = json!([{"id": "ac-1", "settings": {"temp": "24"}}]);
        logger.log_fetch("/1/appliances", 200, &body2);

        let lines = read_lines(path);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["body"].is_array());
        let changes = lines[1]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "ac-1.settings.temp");
        assert_eq!(changes[0]["new"], "24");
    }

    #[test]
    fn diffed_mode_tracks_endpoints_separately() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_fetch("/1/appliances", 200, &json!([{"id": "ac-1"}]));
        logger.log_fetch("/1/devices", 200, &json!([{"id": "hub-1"}]));
        logger.log_fetch("/1/devices", 200, &json!([{"id": "hub-1"}]));

        let lines = read_lines(path);
        assert_eq!(lines[1]["full"], true);
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }
}
