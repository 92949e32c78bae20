//! SQL statement model.
//!
//! Statements are built by the adapter and rendered to PostgreSQL-dialect
//! text with `$n` placeholders plus bind values. Executors wrapping a
//! driver send the rendered form; the in-memory executor interprets the
//! model directly.
//!
//! Every boolean expression is written so that it never evaluates to SQL
//! `NULL` under negation: `NOT` always wraps `COALESCE(.., FALSE)`. With
//! that, `AND` and `OR` treat `NULL` exactly like `FALSE`, which is how the
//! client-side evaluator treats a failed comparison.

use morphdb_codec::{FlatRow, Value};
use std::fmt;

/// Ordering comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `=`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl Comparison {
    fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }

    /// Returns true if `ordering` (stored against operand) satisfies the
    /// operator.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Comparison::Eq => ordering.is_eq(),
            Comparison::Lt => ordering.is_lt(),
            Comparison::Lte => ordering.is_le(),
            Comparison::Gt => ordering.is_gt(),
            Comparison::Gte => ordering.is_ge(),
        }
    }
}

/// A boolean `WHERE` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// `TRUE` or `FALSE`.
    Literal(bool),
    /// `column op $n`
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: Comparison,
        /// Non-null operand.
        value: Value,
    },
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// `column IS DISTINCT FROM $n`
    DistinctFrom {
        /// Column name.
        column: String,
        /// Operand.
        value: Value,
    },
    /// `column IN ($1, $2, ...)`
    In {
        /// Column name.
        column: String,
        /// Non-null options.
        values: Vec<Value>,
    },
    /// `column LIKE $n` or `column ILIKE $n`
    Like {
        /// Column name.
        column: String,
        /// Pattern with `%` and `_` wildcards and `\` escapes.
        pattern: String,
        /// Uses `ILIKE`.
        case_insensitive: bool,
    },
    /// `column @> ARRAY[$n]`: the array column holds the element.
    ArrayContains {
        /// Array column name.
        column: String,
        /// Non-null element.
        value: Value,
    },
    /// `COALESCE(cardinality(column), 0) = $n`
    Cardinality {
        /// Array column name.
        column: String,
        /// Expected element count.
        size: usize,
    },
    /// `COALESCE(column, FALSE)` on a boolean column.
    Flag(String),
    /// Conjunction. Empty is `TRUE`.
    And(Vec<SqlExpr>),
    /// Disjunction. Empty is `FALSE`.
    Or(Vec<SqlExpr>),
    /// `NOT COALESCE(expr, FALSE)`
    Not(Box<SqlExpr>),
}

impl SqlExpr {
    /// Conjunction that flattens nested conjunctions and drops `TRUE`.
    pub fn and(children: impl IntoIterator<Item = SqlExpr>) -> Self {
        let mut out = Vec::new();
        for child in children {
            match child {
                SqlExpr::Literal(true) => {}
                SqlExpr::Literal(false) => return SqlExpr::Literal(false),
                SqlExpr::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => SqlExpr::Literal(true),
            1 => out.remove(0),
            _ => SqlExpr::And(out),
        }
    }

    /// Disjunction that flattens nested disjunctions and drops `FALSE`.
    pub fn or(children: impl IntoIterator<Item = SqlExpr>) -> Self {
        let mut out = Vec::new();
        for child in children {
            match child {
                SqlExpr::Literal(false) => {}
                SqlExpr::Literal(true) => return SqlExpr::Literal(true),
                SqlExpr::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => SqlExpr::Literal(false),
            1 => out.remove(0),
            _ => SqlExpr::Or(out),
        }
    }

    /// Negation.
    pub fn not(inner: SqlExpr) -> Self {
        match inner {
            SqlExpr::Literal(b) => SqlExpr::Literal(!b),
            SqlExpr::IsNull(column) => SqlExpr::IsNotNull(column),
            SqlExpr::IsNotNull(column) => SqlExpr::IsNull(column),
            SqlExpr::Not(inner) => *inner,
            other => SqlExpr::Not(Box::new(other)),
        }
    }

    fn render(&self, binder: &mut Binder) -> String {
        match self {
            SqlExpr::Literal(true) => "TRUE".into(),
            SqlExpr::Literal(false) => "FALSE".into(),
            SqlExpr::Compare { column, op, value } => {
                format!("{} {} {}", quote(column), op.symbol(), binder.bind(value))
            }
            SqlExpr::IsNull(column) => format!("{} IS NULL", quote(column)),
            SqlExpr::IsNotNull(column) => format!("{} IS NOT NULL", quote(column)),
            SqlExpr::DistinctFrom { column, value } => {
                format!("{} IS DISTINCT FROM {}", quote(column), binder.bind(value))
            }
            SqlExpr::In { column, values } => {
                let params: Vec<String> = values.iter().map(|v| binder.bind(v)).collect();
                format!("{} IN ({})", quote(column), params.join(", "))
            }
            SqlExpr::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                let param = binder.bind(&Value::Text(pattern.clone()));
                format!("{} {op} {param}", quote(column))
            }
            SqlExpr::ArrayContains { column, value } => {
                format!("{} @> ARRAY[{}]", quote(column), binder.bind(value))
            }
            SqlExpr::Cardinality { column, size } => {
                let size = i64::try_from(*size).unwrap_or(i64::MAX);
                format!(
                    "COALESCE(cardinality({}), 0) = {}",
                    quote(column),
                    binder.bind(&Value::Integer(size))
                )
            }
            SqlExpr::Flag(column) => format!("COALESCE({}, FALSE)", quote(column)),
            SqlExpr::And(children) => junction(children, " AND ", "TRUE", binder),
            SqlExpr::Or(children) => junction(children, " OR ", "FALSE", binder),
            SqlExpr::Not(inner) => format!("NOT COALESCE({}, FALSE)", inner.render(binder)),
        }
    }
}

fn junction(children: &[SqlExpr], separator: &str, empty: &str, binder: &mut Binder) -> String {
    if children.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = children
        .iter()
        .map(|child| format!("({})", child.render(binder)))
        .collect();
    parts.join(separator)
}

/// Right-hand side of a `SET` assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    /// `column = $n`
    Value(Value),
    /// `column = column + $n`
    Add(Value),
    /// `column = column * $n`
    Multiply(Value),
    /// `column = LEAST(column, $n)`
    Least(Value),
    /// `column = GREATEST(column, $n)`
    Greatest(Value),
    /// `column = column || $n`
    Concat(Value),
}

impl SetExpr {
    /// Returns true if applying the assignment twice has the effect of
    /// applying it once.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, SetExpr::Value(_) | SetExpr::Least(_) | SetExpr::Greatest(_))
    }

    fn render(&self, column: &str, binder: &mut Binder) -> String {
        let column = quote(column);
        match self {
            SetExpr::Value(v) => binder.bind(v),
            SetExpr::Add(v) => format!("{column} + {}", binder.bind(v)),
            SetExpr::Multiply(v) => format!("{column} * {}", binder.bind(v)),
            SetExpr::Least(v) => format!("LEAST({column}, {})", binder.bind(v)),
            SetExpr::Greatest(v) => format!("GREATEST({column}, {})", binder.bind(v)),
            SetExpr::Concat(v) => format!("{column} || {}", binder.bind(v)),
        }
    }
}

/// A column in DDL.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// SQL type.
    pub sql_type: String,
    /// Value for rows that do not set the column, including rows that
    /// existed before the column was added.
    pub default: Option<Value>,
}

impl ColumnSpec {
    fn render(&self) -> String {
        let mut text = format!("{} {}", quote(&self.name), self.sql_type);
        if let Some(literal) = self.default.as_ref().and_then(literal) {
            text.push_str(" DEFAULT ");
            text.push_str(&literal);
        }
        text
    }
}

/// A SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    /// `CREATE TABLE IF NOT EXISTS`
    CreateTable {
        /// Qualified table name.
        table: String,
        /// Columns in plan order.
        columns: Vec<ColumnSpec>,
        /// Primary key column.
        key_column: String,
    },
    /// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`
    AddColumn {
        /// Qualified table name.
        table: String,
        /// The added column.
        column: ColumnSpec,
    },
    /// `CREATE INDEX IF NOT EXISTS`
    CreateIndex {
        /// Qualified table name.
        table: String,
        /// Index name.
        name: String,
        /// Indexed column.
        column: String,
        /// Uses a GIN index, for array membership.
        gin: bool,
    },
    /// `SELECT * FROM table WHERE ... [LIMIT n] [FOR UPDATE]`
    Select {
        /// Qualified table name.
        table: String,
        /// Row filter.
        filter: SqlExpr,
        /// Row limit.
        limit: Option<usize>,
        /// Locks the selected rows until the transaction ends.
        for_update: bool,
    },
    /// `INSERT INTO table (...) VALUES (...)`
    Insert {
        /// Qualified table name.
        table: String,
        /// Column values.
        row: FlatRow,
    },
    /// `UPDATE table SET ... WHERE ...`
    Update {
        /// Qualified table name.
        table: String,
        /// Assignments in column order.
        assignments: Vec<(String, SetExpr)>,
        /// Row filter.
        filter: SqlExpr,
    },
    /// `DELETE FROM table WHERE ...`
    Delete {
        /// Qualified table name.
        table: String,
        /// Row filter.
        filter: SqlExpr,
    },
}

impl SqlStatement {
    /// Short statement kind for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlStatement::CreateTable { .. } => "create table",
            SqlStatement::AddColumn { .. } => "add column",
            SqlStatement::CreateIndex { .. } => "create index",
            SqlStatement::Select { .. } => "select",
            SqlStatement::Insert { .. } => "insert",
            SqlStatement::Update { .. } => "update",
            SqlStatement::Delete { .. } => "delete",
        }
    }

    /// Renders the statement text and its bind values, in placeholder order.
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut binder = Binder::default();
        let text = match self {
            SqlStatement::CreateTable {
                table,
                columns,
                key_column,
            } => {
                let mut parts: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        if column.name == *key_column {
                            format!("{} NOT NULL", column.render())
                        } else {
                            column.render()
                        }
                    })
                    .collect();
                parts.push(format!("PRIMARY KEY ({})", quote(key_column)));
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    quote_qualified(table),
                    parts.join(", ")
                )
            }
            SqlStatement::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                quote_qualified(table),
                column.render()
            ),
            SqlStatement::CreateIndex {
                table,
                name,
                column,
                gin,
            } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}{} ({})",
                quote(name),
                quote_qualified(table),
                if *gin { " USING GIN" } else { "" },
                quote(column)
            ),
            SqlStatement::Select {
                table,
                filter,
                limit,
                for_update,
            } => {
                let mut text = format!(
                    "SELECT * FROM {} WHERE {}",
                    quote_qualified(table),
                    filter.render(&mut binder)
                );
                if let Some(limit) = limit {
                    text.push_str(&format!(" LIMIT {limit}"));
                }
                if *for_update {
                    text.push_str(" FOR UPDATE");
                }
                text
            }
            SqlStatement::Insert { table, row } => {
                let columns: Vec<String> = row.columns().map(quote).collect();
                let params: Vec<String> = row.iter().map(|(_, v)| binder.bind(v)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_qualified(table),
                    columns.join(", "),
                    params.join(", ")
                )
            }
            SqlStatement::Update {
                table,
                assignments,
                filter,
            } => {
                let sets: Vec<String> = assignments
                    .iter()
                    .map(|(column, set)| format!("{} = {}", quote(column), set.render(column, &mut binder)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    quote_qualified(table),
                    sets.join(", "),
                    filter.render(&mut binder)
                )
            }
            SqlStatement::Delete { table, filter } => format!(
                "DELETE FROM {} WHERE {}",
                quote_qualified(table),
                filter.render(&mut binder)
            ),
        };
        (text, binder.params)
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render().0)
    }
}

/// Collects bind values and hands out placeholders.
#[derive(Default)]
struct Binder {
    params: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        format!("${}", self.params.len())
    }
}

/// Double-quotes an identifier.
fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// A SQL literal for a column default. DDL takes no bind parameters.
fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Float(f) if f.is_finite() => Some(format!("{f:?}")),
        Value::Text(text) => Some(format!("'{}'", text.replace('\'', "''"))),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            Some(format!("'\\x{hex}'::bytea"))
        }
        _ => None,
    }
}

/// Quotes each part of `schema.table`.
fn quote_qualified(table: &str) -> String {
    table.split('.').map(quote).collect::<Vec<_>>().join(".")
}

/// Escapes `LIKE` wildcards in a literal substring.
pub fn escape_like(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Matches `text` against a `LIKE` pattern.
pub fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let fold = |c: char| if case_insensitive { c.to_ascii_lowercase() } else { c };
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(fold(chars.next().unwrap_or('\\'))),
            other => Token::Char(fold(other)),
        });
    }
    let text: Vec<char> = text.chars().map(fold).collect();

    // Classic two-pointer wildcard match with backtracking to the last `%`.
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Any) => {
                star = Some((p, t));
                p += 1;
            }
            Some(Token::One) => {
                t += 1;
                p += 1;
            }
            Some(Token::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_renders_placeholders_in_order() {
        let statement = SqlStatement::Select {
            table: "app.person".into(),
            filter: SqlExpr::and([
                SqlExpr::Compare {
                    column: "age".into(),
                    op: Comparison::Gte,
                    value: 18.into(),
                },
                SqlExpr::or([
                    SqlExpr::IsNull("email".into()),
                    SqlExpr::not(SqlExpr::Like {
                        column: "email".into(),
                        pattern: "%@example.com".into(),
                        case_insensitive: false,
                    }),
                ]),
            ]),
            limit: Some(1),
            for_update: true,
        };
        let (text, params) = statement.render();
        assert_eq!(
            text,
            "SELECT * FROM \"app\".\"person\" WHERE (\"age\" >= $1) AND ((\"email\" IS NULL) OR \
             (NOT COALESCE(\"email\" LIKE $2, FALSE))) LIMIT 1 FOR UPDATE"
        );
        assert_eq!(params, vec![Value::Integer(18), Value::Text("%@example.com".into())]);
    }

    #[test]
    fn update_binds_assignments_before_the_filter() {
        let statement = SqlStatement::Update {
            table: "app.person".into(),
            assignments: vec![
                ("age".into(), SetExpr::Add(1.into())),
                ("name".into(), SetExpr::Value("Bo".into())),
            ],
            filter: SqlExpr::ArrayContains {
                column: "tags".into(),
                value: "vip".into(),
            },
        };
        assert_eq!(
            statement.to_string(),
            "UPDATE \"app\".\"person\" SET \"age\" = \"age\" + $1, \"name\" = $2 WHERE \"tags\" @> ARRAY[$3]"
        );
    }

    #[test]
    fn connectives_simplify_literals() {
        assert_eq!(SqlExpr::and([SqlExpr::Literal(true)]), SqlExpr::Literal(true));
        assert_eq!(
            SqlExpr::or([SqlExpr::Literal(false), SqlExpr::IsNull("a".into())]),
            SqlExpr::IsNull("a".into())
        );
        assert_eq!(SqlExpr::not(SqlExpr::IsNull("a".into())), SqlExpr::IsNotNull("a".into()));
    }

    #[test]
    fn like_patterns() {
        assert!(like_matches("hello", "%ell%", false));
        assert!(like_matches("hello", "h_llo", false));
        assert!(!like_matches("hello", "%ELL%", false));
        assert!(like_matches("hello", "%ELL%", true));
        assert!(like_matches("", "%%", false));
        assert!(!like_matches("50", "5\\%", false));
        assert!(like_matches("5%", &escape_like("5%"), false));
        assert!(like_matches("a_b", &format!("%{}%", escape_like("_")), false));
        assert!(!like_matches("ab", &format!("%{}%", escape_like("_")), false));
    }
}
