//! Statement executor.
//!
//! A statement owns at most one server handle. The handle is assigned by
//! the first execute that needs one and released exactly once by
//! [`Statement::close`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::connection::{Connection, NativeStream};
use super::result_set::ResultSet;
use crate::error::{Error, Result};
use crate::protocol::messages::{ExecuteReply, FetchReply, NEW_STATEMENT};
use crate::protocol::types::FieldDescriptor;

/// Server-assigned statement handle. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(i32);

impl StatementHandle {
    /// `None` for zero or negative values, which address nothing.
    pub fn new(raw: i32) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// A statement bound to one connection.
pub struct Statement<'c, S> {
    pub(crate) conn: &'c mut Connection<S>,
    handle: Option<StatementHandle>,
    fetch_size: u32,
    closed: bool,
}

impl<'c, S: NativeStream> Statement<'c, S> {
    pub(crate) fn new(conn: &'c mut Connection<S>) -> Self {
        let fetch_size = conn.fetch_size;
        Self {
            conn,
            handle: None,
            fetch_size,
            closed: false,
        }
    }

    /// Rows requested per round trip. Values below 1 are raised to 1.
    pub fn set_fetch_size(&mut self, rows: u32) {
        self.fetch_size = rows.max(1);
    }

    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Handle assigned by the server, if any.
    pub fn handle(&self) -> Option<StatementHandle> {
        self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run a query and return its first batch behind a cursor.
    pub async fn execute_query(&mut self, sql: &str) -> Result<ResultSet<'_, 'c, S>> {
        let (reply, fields) = self.run(sql).await?;
        let fields = fields.unwrap_or_else(|| Arc::from(Vec::<FieldDescriptor>::new()));
        Ok(ResultSet::new(self, fields, reply))
    }

    /// Run a statement and return the affected-row count.
    pub async fn execute_update(&mut self, sql: &str) -> Result<u64> {
        let (reply, _) = self.run(sql).await?;
        Ok(reply.affected)
    }

    async fn run(
        &mut self,
        sql: &str,
    ) -> Result<(ExecuteReply, Option<Arc<[FieldDescriptor]>>)> {
        if self.closed {
            return Err(Error::StatementClosed);
        }
        let (reply, fields) = self
            .conn
            .execute_raw(self.handle, sql, self.fetch_size)
            .await?;
        self.adopt_handle(reply.handle, reply.has_remain)?;
        Ok((reply, fields))
    }

    fn adopt_handle(&mut self, raw: i32, has_remain: bool) -> Result<()> {
        match (StatementHandle::new(raw), self.handle) {
            (Some(new), None) => {
                debug!(handle = new.get(), "statement handle assigned");
                self.handle = Some(new);
                Ok(())
            }
            (Some(new), Some(old)) if new != old => Err(Error::malformed(format!(
                "server switched statement handle {} to {}",
                old.get(),
                new.get()
            ))),
            (Some(_), Some(_)) => Ok(()),
            // More rows with nothing to fetch them through.
            (None, _) if has_remain => Err(Error::InvalidHandle(raw)),
            (None, _) => Ok(()),
        }
    }

    /// Request the next batch for the open result.
    pub(crate) async fn fetch_batch(&mut self, columns: usize) -> Result<FetchReply> {
        if self.closed {
            return Err(Error::StatementClosed);
        }
        let handle = self.handle.ok_or(Error::InvalidHandle(NEW_STATEMENT))?;
        self.conn.fetch_raw(handle, self.fetch_size, columns).await
    }

    /// Release the server handle. Closing a statement that never received
    /// a handle, or closing twice, sends nothing.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        match self.handle.take() {
            Some(handle) => {
                debug!(handle = handle.get(), "free statement");
                self.conn.free_statement(handle).await
            }
            None => Ok(()),
        }
    }
}

impl<S> Drop for Statement<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            warn!(
                handle = handle.get(),
                "statement dropped without close; server handle not released"
            );
        }
    }
}
