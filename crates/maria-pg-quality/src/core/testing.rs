//! Scripted connector used by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::{QualityError, Result};

use super::schema::{ColumnInfo, TableSchema, TypeBucket};
use super::traits::{Connection, ConnectionTarget, Connector, QueryResult, Statement};
use super::value::SqlValue;

/// What the fake connection observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire,
    Begin,
    Commit,
    Rollback,
    Execute(Statement),
}

#[derive(Debug)]
enum Reply {
    Ok(QueryResult),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    events: Vec<Event>,
}

/// Connector whose connections answer `execute` from a queue.
///
/// An empty queue answers with an empty result.
#[derive(Clone)]
pub struct FakeConnector {
    target: ConnectionTarget,
    script: Arc<Mutex<Script>>,
}

impl FakeConnector {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_target(ConnectionTarget::new(dialect, "localhost", 1, "uni"))
    }

    pub fn with_target(target: ConnectionTarget) -> Self {
        Self {
            target,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn push_rows(&self, columns: &[&str], rows: Vec<Vec<SqlValue>>) -> &Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.push(Reply::Ok(QueryResult::from_rows(columns, rows)))
    }

    pub fn push_affected(&self, n: u64) -> &Self {
        self.push(Reply::Ok(QueryResult::affected(n)))
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.push(Reply::Fail(message.to_string()))
    }

    fn push(&self, reply: Reply) -> &Self {
        self.script.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.lock().unwrap().events.clone()
    }

    /// Executed statements only.
    pub fn statements(&self) -> Vec<Statement> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

struct FakeConnection {
    script: Arc<Mutex<Script>>,
}

impl FakeConnection {
    fn record(&self, event: Event) {
        self.script.lock().unwrap().events.push(event);
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.record(Event::Execute(statement.clone()));
        let reply = self.script.lock().unwrap().replies.pop_front();
        match reply {
            Some(Reply::Ok(result)) => Ok(result),
            Some(Reply::Fail(message)) => Err(QualityError::database(message, "fake")),
            None => Ok(QueryResult::default()),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        self.record(Event::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.record(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record(Event::Rollback);
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        self.script.lock().unwrap().events.push(Event::Acquire);
        Ok(Box::new(FakeConnection {
            script: Arc::clone(&self.script),
        }))
    }
}

pub fn make_test_column(name: &str, native_type: &str, bucket: TypeBucket) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        native_type: native_type.to_string(),
        bucket,
        is_nullable: true,
        max_length: None,
        precision: None,
        scale: None,
    }
}

/// `(Matrikelnummer int PK, Vorname text, Nachname text)`.
pub fn make_test_schema(dialect: Dialect) -> TableSchema {
    let (int_type, text_type) = match dialect {
        Dialect::MariaDb => ("int(11)", "varchar(50)"),
        Dialect::Postgres => ("integer", "character varying"),
    };
    let mut pk = make_test_column("Matrikelnummer", int_type, TypeBucket::Integer);
    pk.is_nullable = false;
    let mut first = make_test_column("Vorname", text_type, TypeBucket::Text);
    first.max_length = Some(50);
    let mut last = make_test_column("Nachname", text_type, TypeBucket::Text);
    last.max_length = Some(50);
    TableSchema::new(
        dialect,
        "uni",
        "studenten",
        vec![pk, first, last],
        vec!["Matrikelnummer".to_string()],
        3,
    )
    .unwrap()
}

/// `(id int PK, user text, order text)`: column names that are reserved words.
pub fn make_reserved_schema(dialect: Dialect) -> TableSchema {
    let mut id = make_test_column("id", "integer", TypeBucket::Integer);
    id.is_nullable = false;
    TableSchema::new(
        dialect,
        "bank",
        "konten",
        vec![
            id,
            make_test_column("user", "text", TypeBucket::Text),
            make_test_column("order", "text", TypeBucket::Text),
        ],
        vec!["id".to_string()],
        2,
    )
    .unwrap()
}

pub fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

pub fn int(v: i64) -> SqlValue {
    SqlValue::Int(v)
}
