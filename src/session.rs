use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::charset::{encode_keys, CR};
use crate::config::MachineConfig;
use crate::machine::{Machine, ResidentRun};
use crate::metrics::set_active_sessions;
use crate::port::ScriptedPort;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session limit of {0} reached")]
    LimitReached(usize),
    #[error("invalid hex address {0:?}")]
    InvalidAddress(String),
}

/// Parse a 1-4 digit hex address, optionally prefixed with `$`.
pub fn parse_address(text: &str) -> Result<u16, SessionError> {
    let digits = text.trim().trim_start_matches('$');
    if digits.is_empty() || digits.len() > 4 {
        return Err(SessionError::InvalidAddress(text.to_string()));
    }
    u16::from_str_radix(digits, 16).map_err(|_| SessionError::InvalidAddress(text.to_string()))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub keys_typed: u64,
    pub lines_entered: u64,
    pub runs: u64,
    pub resident_steps: u64,
    pub resident_cycles: u64,
}

/// One monitor with its own machine, driven over the API.
pub struct MonitorSession {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub stats: UsageStats,
    machine: Machine<ScriptedPort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub store_pointer: u16,
    pub last_examined: u16,
    pub cursor: usize,
    /// Keys typed on the current line but not yet ended with CR.
    pub pending_line: String,
    pub stats: UsageStats,
    pub last_run: Option<ResidentRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputResult {
    /// Everything the display showed while the input was processed.
    pub output: String,
    pub runs: Vec<ResidentRun>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session: SessionInfo,
    /// The opening prompt.
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryData {
    pub address: u16,
    pub data: Vec<u8>,
    pub hex: String,
}

impl MonitorSession {
    pub fn new(name: Option<String>, tags: Vec<String>, config: MachineConfig) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut machine = Machine::new(ScriptedPort::new(), config);
        machine.boot();

        Self {
            name: name.unwrap_or_else(|| format!("monitor-{}", &id[..8])),
            id,
            tags,
            created_at: now,
            last_activity: now,
            stats: UsageStats::default(),
            machine,
        }
    }

    pub fn machine(&self) -> &Machine<ScriptedPort> {
        &self.machine
    }

    /// Display output not yet collected.
    pub fn take_output(&mut self) -> String {
        crate::charset::decode_display_text(&self.machine.port_mut().take_output())
    }

    pub fn input(&mut self, text: &str) -> InputResult {
        let keys = encode_keys(text);
        self.stats.keys_typed += keys.len() as u64;
        self.stats.lines_entered += keys.iter().filter(|&&k| k == CR).count() as u64;

        let (output, runs) = self.machine.feed(text);
        for run in &runs {
            self.stats.runs += 1;
            self.stats.resident_steps += run.steps;
            self.stats.resident_cycles += run.cycles;
        }
        self.last_activity = Utc::now();

        InputResult { output, runs }
    }

    pub fn read_memory(&self, address: u16, length: u16) -> MemoryData {
        let data = self.machine.memory().read_range(address, length);
        let hex = data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");
        MemoryData { address, data, hex }
    }

    pub fn info(&self) -> SessionInfo {
        let monitor = self.machine.monitor();
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            store_pointer: monitor.store_pointer(),
            last_examined: monitor.last_examined(),
            cursor: monitor.editor().cursor(),
            pending_line: crate::charset::decode_display_text(monitor.editor().pending()),
            stats: self.stats.clone(),
            last_run: self.machine.last_run().copied(),
        }
    }
}

/// A session plus the info it showed after its last request.
///
/// `info` is refreshed whenever the session lock is released, so listing
/// never waits for resident code that is still running.
struct SessionSlot {
    session: Mutex<MonitorSession>,
    info: Mutex<SessionInfo>,
}

impl SessionSlot {
    fn new(session: MonitorSession) -> Self {
        Self {
            info: Mutex::new(session.info()),
            session: Mutex::new(session),
        }
    }

    fn info(&self) -> SessionInfo {
        relock(&self.info).clone()
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut MonitorSession) -> T) -> T {
        let mut session = relock(&self.session);
        let result = f(&mut *session);
        *relock(&self.info) = session.info();
        result
    }
}

// A panic while a lock was held leaves the data usable.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// All open sessions, capped at `max_sessions`.
///
/// The map lock is only held to look a session up. Work on a session,
/// running resident code included, holds that session's lock alone.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
    machine: MachineConfig,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(machine: MachineConfig, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            machine,
            max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        relock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(&self, request: CreateSessionRequest) -> Result<CreatedSession, SessionError> {
        let mut sessions = relock(&self.sessions);
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::LimitReached(self.max_sessions));
        }

        let mut session = MonitorSession::new(
            request.name,
            request.tags.unwrap_or_default(),
            self.machine.clone(),
        );
        let output = session.take_output();
        let created = CreatedSession {
            session: session.info(),
            output,
        };
        info!("session {} ({}) opened", session.id, session.name);

        sessions.insert(session.id.clone(), Arc::new(SessionSlot::new(session)));
        set_active_sessions(sessions.len());
        Ok(created)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let slots: Vec<Arc<SessionSlot>> = relock(&self.sessions).values().cloned().collect();
        let mut list: Vec<SessionInfo> = slots.iter().map(|slot| slot.info()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub fn info(&self, id: &str) -> Result<SessionInfo, SessionError> {
        Ok(self.slot(id)?.info())
    }

    /// Type `text` into a session. Blocks while resident code runs, so
    /// async callers should hand this to a blocking thread.
    pub fn input(&self, id: &str, text: &str) -> Result<InputResult, SessionError> {
        Ok(self.slot(id)?.with_session(|session| session.input(text)))
    }

    pub fn read_memory(&self, id: &str, address: u16, length: u16) -> Result<MemoryData, SessionError> {
        Ok(self.slot(id)?.with_session(|session| session.read_memory(address, length)))
    }

    /// Close a session. A run still in progress finishes on its own.
    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = relock(&self.sessions);
        sessions
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        set_active_sessions(sessions.len());
        info!("session {} closed", id);
        Ok(())
    }

    fn slot(&self, id: &str) -> Result<Arc<SessionSlot>, SessionError> {
        relock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}
