//! Source lifecycle
//!
//! A source moves `Created → Prepared → Started → Stopped → Dropped`. Only
//! `Started` accepts bus messages; `Prepared` exists so a source can be
//! wired into the operator graph on every node (and accept forwarded rows)
//! before any node activates its consumers during DDL commit.

use std::sync::{Arc, RwLock};

use riverdb_core::{Row, SourceInfo};

use crate::error::{PushError, Result};
use crate::message_parser::{BusMessage, DescriptorRegistry, MessageParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Created,
    Prepared,
    Started,
    Stopped,
    Dropped,
}

pub struct Source {
    info: SourceInfo,
    parser: Option<MessageParser>,
    state: RwLock<SourceState>,
}

impl Source {
    pub fn new(
        info: SourceInfo,
        registry: Option<Arc<dyn DescriptorRegistry>>,
    ) -> Result<Source> {
        info.validate()?;
        let parser = if info.topic_info.col_selectors.is_empty() {
            None
        } else {
            Some(MessageParser::new(&info, registry)?)
        };
        Ok(Source {
            info,
            parser,
            state: RwLock::new(SourceState::Created),
        })
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn state(&self) -> SourceState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// `Created → Prepared`. Idempotent.
    pub fn prepare(&self) -> Result<()> {
        self.transition(|state| match state {
            SourceState::Created | SourceState::Prepared => Ok(SourceState::Prepared),
            other => Err(other),
        })
    }

    /// `Prepared → Started` (also restart after `Stopped`). Idempotent.
    pub fn start(&self) -> Result<()> {
        self.transition(|state| match state {
            SourceState::Prepared | SourceState::Started | SourceState::Stopped => {
                Ok(SourceState::Started)
            }
            other => Err(other),
        })
    }

    /// `Started → Stopped`. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.transition(|state| match state {
            SourceState::Started | SourceState::Stopped | SourceState::Prepared => {
                Ok(SourceState::Stopped)
            }
            other => Err(other),
        })
    }

    /// Terminal.
    pub fn mark_dropped(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = SourceState::Dropped;
    }

    fn transition(
        &self,
        next: impl FnOnce(SourceState) -> std::result::Result<SourceState, SourceState>,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match next(*state) {
            Ok(new_state) => {
                *state = new_state;
                Ok(())
            }
            Err(current) => Err(PushError::Internal(format!(
                "source {} cannot transition from {current:?}",
                self.info.name()
            ))),
        }
    }

    /// Parse a batch of bus messages. Rejected unless `Started`; a parse
    /// failure surfaces the failing offset and the batch is not consumed.
    pub fn parse_messages(&self, messages: &[BusMessage]) -> Result<Vec<Row>> {
        if self.state() != SourceState::Started {
            return Err(PushError::SourceNotStarted(self.info.name().to_string()));
        }
        let parser = self.parser.as_ref().ok_or_else(|| {
            PushError::Internal(format!(
                "source {} has no column selectors",
                self.info.name()
            ))
        })?;
        parser.parse_messages(messages)
    }

    /// Whether the source accepts rows at all (message or direct form).
    pub fn accepts_rows(&self) -> bool {
        matches!(self.state(), SourceState::Started | SourceState::Prepared)
    }
}
