//! Durable support-ticket log: one JSON record per line, append-only.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub created_utc: String,
    pub question: String,
    pub contact: Option<String>,
    pub status: String,
}

#[derive(Clone)]
pub struct TicketStore {
    path: PathBuf,
    // (unix second, counter within that second) of the last issued id
    last_id: Arc<Mutex<(i64, u32)>>,
}

impl TicketStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_id: Arc::new(Mutex::new((0, 0))),
        }
    }

    /// Appends one ticket record and returns its id.
    pub fn create_ticket(&self, question: &str, contact: Option<&str>) -> Result<String, ApiError> {
        let now = Utc::now();
        let id = self.next_id(now.timestamp());
        let ticket = Ticket {
            id: id.clone(),
            created_utc: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            question: question.to_string(),
            contact: contact.map(|c| c.to_string()),
            status: "open".to_string(),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ApiError::internal)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(ApiError::internal)?;
        let line = serde_json::to_string(&ticket).map_err(ApiError::internal)?;
        writeln!(file, "{}", line).map_err(ApiError::internal)?;

        tracing::info!("Created ticket {}", id);
        Ok(id)
    }

    // Time-derived ids stay unique within a process run: the first ticket
    // in a second keeps the bare timestamp, later ones (or tickets minted
    // after the clock stepped backwards) get a counter suffix.
    fn next_id(&self, timestamp: i64) -> String {
        let mut last = self.last_id.lock().unwrap_or_else(|e| e.into_inner());
        if timestamp > last.0 {
            *last = (timestamp, 0);
            format!("T-{}", timestamp)
        } else {
            last.1 += 1;
            format!("T-{}-{}", last.0, last.1)
        }
    }
}
