//! Scripted mock backend for tests.
//!
//! Plays the role a SQL mock library plays for the drivers: results and
//! errors are queued up front, and every statement the code under test sends
//! is recorded for inspection.

use super::{BackendOpener, BackendSession, Column, DriverError, RowStream, Value};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) enum ScriptedResult {
    Rows {
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
    },
    Error(DriverError),
}

#[derive(Clone, Default)]
struct SessionState {
    executed: Arc<Mutex<Vec<String>>>,
    query_script: Arc<Mutex<VecDeque<ScriptedResult>>>,
    exec_script: Arc<Mutex<VecDeque<Result<(), DriverError>>>>,
    fail_ping: Arc<Mutex<Option<String>>>,
    closed: Arc<Mutex<bool>>,
}

/// Handle onto a mock session's shared state; stays usable after the session
/// itself has been boxed and moved into the code under test.
#[derive(Clone, Default)]
pub(crate) struct MockHandle {
    state: SessionState,
}

impl MockHandle {
    /// Queue a result set for the next query.
    pub fn push_rows(&self, columns: Vec<Column>, rows: Vec<Vec<Value>>) {
        self.state
            .query_script
            .lock()
            .push_back(ScriptedResult::Rows { columns, rows });
    }

    /// Queue a driver error for the next query.
    pub fn push_error(&self, err: DriverError) {
        self.state
            .query_script
            .lock()
            .push_back(ScriptedResult::Error(err));
    }

    /// Queue an outcome for the next `execute` call.
    pub fn push_exec(&self, result: Result<(), DriverError>) {
        self.state.exec_script.lock().push_back(result);
    }

    /// Every SQL string the session has seen, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.state.closed.lock()
    }
}

#[derive(Default)]
pub(crate) struct MockSession {
    state: SessionState,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession").finish_non_exhaustive()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    fn set_fail_ping(&self, message: &str) {
        *self.state.fail_ping.lock() = Some(message.to_string());
    }
}

#[async_trait]
impl BackendSession for MockSession {
    async fn query(
        &mut self,
        sql: &str,
        _binds: &[Option<String>],
    ) -> Result<Box<dyn RowStream>, DriverError> {
        self.state.executed.lock().push(sql.to_string());
        match self.state.query_script.lock().pop_front() {
            Some(ScriptedResult::Rows { columns, rows }) => Ok(Box::new(MockRows {
                columns,
                rows: rows.into(),
            })),
            Some(ScriptedResult::Error(err)) => Err(err),
            None => Ok(Box::new(MockRows {
                columns: Vec::new(),
                rows: VecDeque::new(),
            })),
        }
    }

    async fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.state.executed.lock().push(sql.to_string());
        self.state.exec_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        match self.state.fail_ping.lock().as_ref() {
            Some(msg) => Err(DriverError::other(msg.clone())),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        *self.state.closed.lock() = true;
        Ok(())
    }
}

pub(crate) struct MockRows {
    columns: Vec<Column>,
    rows: VecDeque<Vec<Value>>,
}

#[async_trait]
impl RowStream for MockRows {
    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.rows.clear();
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockOpener {
    opened: Arc<Mutex<Vec<(String, String)>>>,
    sessions: Arc<Mutex<VecDeque<MockSession>>>,
    fail_open: Arc<Mutex<Option<String>>>,
    fail_ping: Arc<Mutex<Option<String>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a prepared session; openings beyond the queue hand out fresh
    /// empty sessions.
    pub fn push_session(&self, session: MockSession) {
        self.sessions.lock().push_back(session);
    }

    pub fn fail_open(&self, message: &str) {
        *self.fail_open.lock() = Some(message.to_string());
    }

    pub fn fail_ping(&self, message: &str) {
        *self.fail_ping.lock() = Some(message.to_string());
    }

    /// Every (driver, connection string) pair that was opened.
    pub fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl BackendOpener for MockOpener {
    async fn open(
        &self,
        driver: &str,
        conn_str: &str,
    ) -> Result<Box<dyn BackendSession>, DriverError> {
        self.opened
            .lock()
            .push((driver.to_string(), conn_str.to_string()));
        if let Some(msg) = self.fail_open.lock().as_ref() {
            return Err(DriverError::other(msg.clone()));
        }
        let session = self.sessions.lock().pop_front().unwrap_or_default();
        if let Some(msg) = self.fail_ping.lock().as_ref() {
            session.set_fail_ping(msg);
        }
        Ok(Box::new(session))
    }
}
