//! Outbound message buffer
//!
//! Batches protocol messages per session and flushes them to the socket with
//! a single write. Confined to its owning session; no locking.

use tokio::io::AsyncWrite;

use super::protocol::messages::{write_messages, BackendMessage};
use crate::error::Result;

pub struct MessageBuffer<W> {
    writer: W,
    queue: Vec<BackendMessage>,
}

impl<W: AsyncWrite + Unpin> MessageBuffer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            queue: Vec::new(),
        }
    }

    /// Append messages to the queue in order.
    pub fn queue<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = BackendMessage>,
    {
        self.queue.extend(messages);
    }

    /// Encode the whole queue into one buffer, write it once, and empty the
    /// queue. On write error the queue is left as-is and the error surfaces.
    pub async fn flush(&mut self) -> Result<()> {
        write_messages(&mut self.writer, &self.queue).await?;
        self.queue.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
