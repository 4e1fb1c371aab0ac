//! Server-side cursors
//!
//! Lets BI tools fetch large Vertica result sets in batches.
//!
//! # Lifecycle
//! 1. `DECLARE name <TEXT|BINARY> CURSOR ... FOR <query>` opens the backend
//!    row stream and captures its column types
//! 2. `FETCH [direction] [count] FROM name` drains up to count rows
//! 3. `CLOSE name` (or session end) releases the stream

use tracing::debug;

use super::protocol::messages::BackendMessage;
use super::row_encoder::{encode_row_binary, encode_row_text, row_description};
use crate::backend::{BackendSession, Column, RowStream};
use crate::error::{GatewayError, Result};

/// Row encoding requested in the DECLARE statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorFormat {
    Text,
    Binary,
}

impl CursorFormat {
    pub fn parse(cursor_type: &str) -> Result<Self> {
        match cursor_type {
            "TEXT" => Ok(CursorFormat::Text),
            "BINARY" => Ok(CursorFormat::Binary),
            other => Err(GatewayError::QueryParse(format!(
                "unknown cursor type: {}",
                other
            ))),
        }
    }
}

pub struct Cursor {
    pub name: String,
    query: String,
    format: CursorFormat,
    rows: Option<Box<dyn RowStream>>,
    columns: Vec<Column>,
}

impl Cursor {
    pub fn new(name: String, query: String, format: CursorFormat) -> Self {
        Self {
            name,
            query,
            format,
            rows: None,
            columns: Vec::new(),
        }
    }

    /// Run the cursor's query and capture the column types. Called exactly
    /// once before any fetch.
    pub async fn open(&mut self, db: &mut dyn BackendSession) -> Result<()> {
        let rows = db.query(&self.query, &[]).await?;
        self.columns = rows.columns().to_vec();
        self.rows = Some(rows);
        debug!(cursor = %self.name, "cursor opened");
        Ok(())
    }

    /// Drain up to `n` rows: a RowDescription followed by the encoded rows.
    pub async fn fetch(&mut self, n: i64) -> Result<Vec<BackendMessage>> {
        debug!(cursor = %self.name, n, "fetching rows using cursor");
        let rows = self
            .rows
            .as_mut()
            .ok_or_else(|| GatewayError::UnknownCursor(self.name.clone()))?;

        let mut messages = vec![row_description(&self.columns)];
        for _ in 0..n {
            let Some(values) = rows.next_row().await? else {
                break;
            };
            let row = match self.format {
                CursorFormat::Text => encode_row_text(&values, &self.columns)?,
                CursorFormat::Binary => encode_row_binary(&values, &self.columns)?,
            };
            messages.push(row);
        }
        Ok(messages)
    }

    /// Release the backend stream. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        match self.rows.as_mut() {
            None => {
                debug!(cursor = %self.name, "cursor already closed");
                Ok(())
            }
            Some(rows) => {
                rows.close().await?;
                self.rows = None;
                Ok(())
            }
        }
    }
}
