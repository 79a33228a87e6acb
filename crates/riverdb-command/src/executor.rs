//! The statement executor

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::debug;

use riverdb_cluster::{
    Notification, NotificationListener, SessionClosedMessage,
};
use riverdb_core::{ColumnType, Row, Value};
use riverdb_sql::{parse_statement, Statement};

use crate::commands::{
    CreateMaterializedViewCommand, CreateSourceCommand, DropMaterializedViewCommand,
    DropSourceCommand,
};
use crate::ddl::{DdlCommand, DdlContext, DdlCoordinator};
use crate::error::{CommandError, Result};
use crate::session::Session;

/// The rows (possibly none) a statement produced.
#[derive(Debug, Clone)]
pub struct StatementResult {
    pub col_names: Vec<String>,
    pub col_types: Vec<ColumnType>,
    pub rows: Vec<Row>,
}

impl StatementResult {
    pub fn empty() -> StatementResult {
        StatementResult {
            col_names: Vec::new(),
            col_types: Vec::new(),
            rows: Vec::new(),
        }
    }
}

pub struct Executor {
    ctx: Arc<DdlContext>,
    coordinator: Arc<DdlCoordinator>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    session_sequence: AtomicI64,
}

impl Executor {
    pub fn new(ctx: Arc<DdlContext>, coordinator: Arc<DdlCoordinator>) -> Arc<Executor> {
        Arc::new(Executor {
            ctx,
            coordinator,
            sessions: Mutex::new(HashMap::new()),
            session_sequence: AtomicI64::new(0),
        })
    }

    /// The listener to register for `NotificationType::SessionClosed`.
    pub fn session_closed_listener(self: &Arc<Self>) -> Arc<dyn NotificationListener> {
        Arc::new(SessionClosedListener {
            executor: Arc::downgrade(self),
        })
    }

    pub fn create_session(&self, schema_name: &str) -> Arc<Session> {
        self.ctx.meta.get_or_create_schema(schema_name);
        let seq = self.session_sequence.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}", self.ctx.cluster.node_id(), seq);
        let session = Arc::new(Session::new(id.clone(), schema_name.to_string()));
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&session));
        session
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| CommandError::UnknownSession(session_id.to_string()))
    }

    /// Close a session: every node discards whatever shard-local state it
    /// holds for it (at-least-once, so discarding must be idempotent).
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        self.discard_session_state(session_id);
        self.ctx
            .cluster
            .broadcast_notification(Notification::SessionClosed(SessionClosedMessage {
                session_id: session_id.to_string(),
            }))
            .await?;
        Ok(())
    }

    fn discard_session_state(&self, session_id: &str) {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(session) = removed {
            session.clear_prepared_statements();
            debug!(session_id, "session state discarded");
        }
    }

    /// Execute one statement on a session. Sessions are single-consumer;
    /// overlapping calls fail with `SessionInUse`.
    pub async fn execute_statement(
        &self,
        session: &Arc<Session>,
        sql: &str,
    ) -> Result<StatementResult> {
        let _exclusive = session.enter()?;
        match parse_statement(sql)? {
            Statement::Select(select_sql) => self.run_select(session, &select_sql).await,
            Statement::Prepare(inner) => {
                if !inner.trim_start().to_lowercase().starts_with("select") {
                    return Err(CommandError::NotPreparable(inner));
                }
                let ps_id = session.add_prepared_statement(inner);
                Ok(StatementResult {
                    col_names: vec!["ps_id".to_string()],
                    col_types: vec![ColumnType::BigInt],
                    rows: vec![Row::new(vec![Value::BigInt(ps_id)])],
                })
            }
            Statement::Execute { ps_id, args } => {
                let template = session.prepared_statement(ps_id)?;
                let bound = bind_args(&template, &args)?;
                self.run_select(session, &bound).await
            }
            Statement::CreateSource(ast) => {
                let sequences = vec![self.ctx.cluster.generate_table_id().await?];
                let command: Arc<dyn DdlCommand> = Arc::new(CreateSourceCommand::new(
                    Arc::clone(&self.ctx),
                    session.schema_name().to_string(),
                    sql.to_string(),
                    sequences,
                    Some(ast),
                ));
                self.coordinator.run(command).await?;
                Ok(StatementResult::empty())
            }
            Statement::CreateMaterializedView(ast) => {
                let sequences = vec![self.ctx.cluster.generate_table_id().await?];
                let command: Arc<dyn DdlCommand> = Arc::new(CreateMaterializedViewCommand::new(
                    Arc::clone(&self.ctx),
                    session.schema_name().to_string(),
                    sql.to_string(),
                    sequences,
                    ast.name,
                    ast.query,
                ));
                self.coordinator.run(command).await?;
                Ok(StatementResult::empty())
            }
            Statement::DropSource(name) => {
                let command: Arc<dyn DdlCommand> = Arc::new(DropSourceCommand::new(
                    Arc::clone(&self.ctx),
                    session.schema_name().to_string(),
                    sql.to_string(),
                    name,
                ));
                self.coordinator.run(command).await?;
                Ok(StatementResult::empty())
            }
            Statement::DropMaterializedView(name) => {
                let command: Arc<dyn DdlCommand> = Arc::new(DropMaterializedViewCommand::new(
                    Arc::clone(&self.ctx),
                    session.schema_name().to_string(),
                    sql.to_string(),
                    name,
                ));
                self.coordinator.run(command).await?;
                Ok(StatementResult::empty())
            }
        }
    }

    async fn run_select(&self, session: &Arc<Session>, sql: &str) -> Result<StatementResult> {
        let mut query =
            self.ctx
                .pull
                .build_pull_query(session.id(), session.schema_name(), sql)?;
        let rows = query.collect().await?;
        Ok(StatementResult {
            col_names: query.col_names().to_vec(),
            col_types: query.col_types().to_vec(),
            rows,
        })
    }
}

/// Substitute `?` placeholders (outside string literals) with positional
/// arguments. Numeric arguments are inlined bare; everything else becomes a
/// quoted string literal.
fn bind_args(template: &str, args: &[String]) -> Result<String> {
    let mut bound = String::with_capacity(template.len() + 16);
    let mut next_arg = 0usize;
    let mut in_string = false;
    for c in template.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                bound.push(c);
            }
            '?' if !in_string => {
                let arg = args.get(next_arg).ok_or_else(|| {
                    CommandError::Sql(riverdb_sql::SqlError::InvalidStatement(format!(
                        "statement has more placeholders than arguments ({})",
                        args.len()
                    )))
                })?;
                next_arg += 1;
                if arg.parse::<i64>().is_ok() || arg.parse::<f64>().is_ok() {
                    bound.push_str(arg);
                } else {
                    bound.push('\'');
                    bound.push_str(&arg.replace('\'', "''"));
                    bound.push('\'');
                }
            }
            _ => bound.push(c),
        }
    }
    if next_arg != args.len() {
        return Err(CommandError::Sql(riverdb_sql::SqlError::InvalidStatement(
            format!(
                "{} arguments supplied, {} placeholders bound",
                args.len(),
                next_arg
            ),
        )));
    }
    Ok(bound)
}

struct SessionClosedListener {
    executor: Weak<Executor>,
}

#[async_trait]
impl NotificationListener for SessionClosedListener {
    async fn handle_notification(
        &self,
        notification: Notification,
    ) -> riverdb_cluster::Result<()> {
        let Notification::SessionClosed(message) = notification else {
            return Ok(());
        };
        if let Some(executor) = self.executor.upgrade() {
            executor.discard_session_state(&message.session_id);
        }
        Ok(())
    }
}
