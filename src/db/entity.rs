use crate::db::statement::{CmpOp, Select, Statement};
use crate::db::value::{Column, Row, Value};
use crate::error::DbError;

/// A record type stored in one table with an integer primary key.
///
/// `COLUMNS` must list every column `from_row` reads, primary key included.
/// `insert_values` lists the columns written on insert; the primary key is
/// left to the database.
pub trait Entity: Clone + Send + Sync + 'static {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [Column];

    fn from_row(row: &Row) -> Result<Self, DbError>;

    /// `None` until the row has been inserted.
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn insert_values(&self) -> Vec<(&'static str, Value)>;

    /// `insert_values` with every NULL typed from `COLUMNS`.
    fn typed_insert_values(&self) -> Vec<(&'static str, Value)> {
        self.insert_values()
            .into_iter()
            .map(|(name, value)| {
                let value = match Self::COLUMNS.iter().find(|c| c.name == name) {
                    Some(column) => value.typed_as(column.ty),
                    None => value,
                };
                (name, value)
            })
            .collect()
    }

    fn select() -> Select {
        Select::from(Self::TABLE, Self::COLUMNS)
    }

    fn select_by_id(id: i64) -> Select {
        Self::select().filter(Self::PRIMARY_KEY, CmpOp::Eq, id)
    }

    /// `INSERT ... RETURNING <pk>`; both PostgreSQL and SQLite (3.35+) accept it.
    fn insert_statement(&self) -> Statement {
        insert_statement(Self::TABLE, Self::PRIMARY_KEY, &self.typed_insert_values(), None)
    }

    fn delete_statement(&self) -> Result<Statement, DbError> {
        let id = self.id().ok_or(DbError::Unpersisted { entity: Self::TABLE })?;
        Ok(Statement::new(format!(
            "DELETE FROM {} WHERE {} = $1",
            Self::TABLE,
            Self::PRIMARY_KEY
        ))
        .bind(id))
    }
}

/// Render an insert for `table`. Without a key the database assigns one and
/// the statement returns it; with a key the row is written under that exact id,
/// which is how journaled inserts are replayed after a reconnect.
pub fn insert_statement(
    table: &str,
    primary_key: &str,
    values: &[(&'static str, Value)],
    key: Option<i64>,
) -> Statement {
    let mut names: Vec<&str> = Vec::with_capacity(values.len() + 1);
    let mut params: Vec<Value> = Vec::with_capacity(values.len() + 1);
    if let Some(id) = key {
        names.push(primary_key);
        params.push(Value::Int(id));
    }
    for (name, value) in values {
        names.push(*name);
        params.push(value.clone());
    }
    let placeholders = (1..=params.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        names.join(", ")
    );
    if key.is_none() {
        sql.push_str(&format!(" RETURNING {primary_key}"));
    }
    Statement { sql, params }
}
