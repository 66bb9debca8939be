//! Bound SQL statements and the lazy `SELECT` description behind query proxies.
//!
//! Placeholders are always `$1..$n`; both PostgreSQL and SQLite accept them.

use crate::db::value::{Column, Value};

/// SQL text plus positional parameters. Cheap to clone so the session can
/// keep a journal of what ran inside the current transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CmpOp {
    fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Compare {
        column: String,
        op: CmpOp,
        value: Value,
    },
    IsNull(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    table: String,
    on: String,
}

/// A deferred read. Building it never touches the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: &'static str,
    columns: Vec<Column>,
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
    order: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    pub fn from(table: &'static str, columns: &[Column]) -> Self {
        Self {
            table,
            columns: columns.to_vec(),
            joins: Vec::new(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn filter(mut self, column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn filter_null(mut self, column: impl Into<String>) -> Self {
        self.predicates.push(Predicate::IsNull(column.into()));
        self
    }

    pub fn join(mut self, table: impl Into<String>, on: impl Into<String>) -> Self {
        self.joins.push(Join {
            table: table.into(),
            on: on.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order.push((column.into(), order));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Replace the projection, e.g. to read a single expression via `scalar`.
    pub fn project(mut self, columns: &[Column]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    /// Render the full `SELECT`.
    pub fn to_statement(&self) -> Statement {
        let projection = self
            .columns
            .iter()
            .map(|c| self.qualify(c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {projection} FROM {}", self.table);
        let params = self.render_tail(&mut sql, true);
        Statement { sql, params }
    }

    /// Render `SELECT COUNT(*)` over the same rows the full select would return.
    pub fn to_count_statement(&self) -> Statement {
        if self.limit.is_some() || self.offset.is_some() {
            let inner = self.to_statement();
            return Statement {
                sql: format!("SELECT COUNT(*) FROM ({}) AS counted", inner.sql),
                params: inner.params,
            };
        }
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let params = self.render_tail(&mut sql, false);
        Statement { sql, params }
    }

    // Bare column names are qualified with the root table once joins exist;
    // anything containing a dot or parenthesis is taken verbatim.
    fn qualify(&self, column: &str) -> String {
        if self.joins.is_empty() || column.contains('.') || column.contains('(') {
            column.to_string()
        } else {
            format!("{}.{column}", self.table)
        }
    }

    fn render_tail(&self, sql: &mut String, with_paging: bool) -> Vec<Value> {
        let mut params = Vec::new();
        for join in &self.joins {
            sql.push_str(&format!(" JOIN {} ON {}", join.table, join.on));
        }

        let clauses: Vec<String> = self
            .predicates
            .iter()
            .map(|p| match p {
                Predicate::Compare { column, op, value } => {
                    params.push(value.clone());
                    format!("{} {} ${}", self.qualify(column), op.as_sql(), params.len())
                }
                Predicate::IsNull(column) => format!("{} IS NULL", self.qualify(column)),
            })
            .collect();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !with_paging {
            return params;
        }

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, dir)| {
                    let dir = match dir {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    format!("{} {dir}", self.qualify(column))
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite only accepts OFFSET after a LIMIT.
            (None, Some(_)) => sql.push_str(&format!(" LIMIT {}", i64::MAX)),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        params
    }
}
