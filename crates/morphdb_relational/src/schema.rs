//! Table layout and DDL.

use crate::statement::{ColumnSpec, SqlStatement};
use morphdb_codec::{
    ColumnDef, ColumnPlan, FieldDescriptor, FieldKind, MapFormat, PrimitiveKind, StorageType,
    TypeDescriptor, Value,
};
use morphdb_core::TableOptions;
use std::collections::BTreeMap;

/// Physical layout of one record type in the relational store.
#[derive(Debug, Clone)]
pub struct RelationalSchema {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Primary key column.
    pub key_column: String,
    /// Columns derived from the record descriptor.
    pub plan: ColumnPlan,
    /// Columns with a secondary index.
    pub indexed: Vec<String>,
    /// Storage defaults of scalar columns for fields declared with one.
    pub defaults: BTreeMap<String, Value>,
}

impl RelationalSchema {
    /// Derives the layout of a record type.
    pub fn derive(
        schema: &str,
        descriptor: &TypeDescriptor,
        key_field: &str,
        options: &TableOptions,
        format: &MapFormat,
    ) -> Self {
        let plan = format.column_plan(descriptor);
        let mut defaults = BTreeMap::new();
        collect_defaults(format, &plan, "", &descriptor.fields, &mut defaults);
        Self {
            schema: schema.to_string(),
            table: options.resolve_name(descriptor.name),
            key_column: format.column_path(key_field),
            plan,
            indexed: options
                .indexed
                .iter()
                .map(|field| format.column_path(field))
                .collect(),
            defaults,
        }
    }

    /// `schema.table`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Returns true if lookups on the column are served by an index.
    pub fn is_indexed(&self, column: &str) -> bool {
        column == self.key_column || self.indexed.iter().any(|c| c == column)
    }

    /// Column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.plan.get(name)
    }

    fn column_spec(&self, column: &ColumnDef) -> ColumnSpec {
        ColumnSpec {
            name: column.name.clone(),
            sql_type: sql_type(&column.storage),
            default: self.defaults.get(&column.name).cloned(),
        }
    }

    /// Idempotent DDL: `CREATE TABLE` with every column, then
    /// `ADD COLUMN` for every non-key column so that tables created by an
    /// older version of the record gain the fields added since. Rows that
    /// predate a column take its default, or `NULL` without one.
    pub fn create_statements(&self) -> Vec<SqlStatement> {
        let table = self.qualified();
        let mut statements = vec![SqlStatement::CreateTable {
            table: table.clone(),
            columns: self.plan.columns().iter().map(|c| self.column_spec(c)).collect(),
            key_column: self.key_column.clone(),
        }];
        for column in self.plan.columns() {
            if column.name == self.key_column {
                continue;
            }
            statements.push(SqlStatement::AddColumn {
                table: table.clone(),
                column: self.column_spec(column),
            });
        }
        for column in &self.indexed {
            if *column == self.key_column {
                continue;
            }
            let gin = self
                .column(column)
                .is_some_and(|c| matches!(c.storage, StorageType::Array(_)));
            statements.push(SqlStatement::CreateIndex {
                table: table.clone(),
                name: format!("{}_{column}_idx", self.table),
                column: column.clone(),
                gin,
            });
        }
        statements
    }
}

/// Walks non-optional fields, recording declared defaults of fields that
/// map to one scalar column.
fn collect_defaults(
    format: &MapFormat,
    plan: &ColumnPlan,
    prefix: &str,
    fields: &[FieldDescriptor],
    out: &mut BTreeMap<String, Value>,
) {
    for field in fields {
        if field.kind.is_nullable() {
            continue;
        }
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };
        let column = format.column_path(&path);
        let scalar = plan
            .get(&column)
            .is_some_and(|c| matches!(c.storage, StorageType::Scalar(_)));
        match (&field.kind, &field.default) {
            (_, Some(default)) if scalar && !default.is_null() => {
                if let Ok(value) = format.to_storage_value(&column, &field.kind, default) {
                    out.insert(column, value);
                }
            }
            (FieldKind::Nested(nested), _) if !scalar => {
                collect_defaults(format, plan, &path, &nested.fields, out);
            }
            _ => {}
        }
    }
}

/// SQL type of a storage type.
///
/// Text uses the `C` collation so that the server orders strings by byte
/// value, like the client-side evaluator. Structure-of-arrays columns map
/// to one-dimensional arrays; anything else that is not a scalar is kept
/// as `JSONB`.
pub fn sql_type(storage: &StorageType) -> String {
    fn scalar(kind: PrimitiveKind) -> &'static str {
        match kind {
            PrimitiveKind::Bool => "BOOLEAN",
            PrimitiveKind::Integer => "BIGINT",
            PrimitiveKind::Float => "DOUBLE PRECISION",
            PrimitiveKind::Text => "TEXT COLLATE \"C\"",
            PrimitiveKind::Bytes => "BYTEA",
        }
    }
    match storage {
        StorageType::Scalar(kind) => scalar(*kind).to_string(),
        StorageType::Array(element) => match element.as_ref() {
            StorageType::Scalar(PrimitiveKind::Text) => "TEXT[] COLLATE \"C\"".to_string(),
            StorageType::Scalar(kind) => format!("{}[]", scalar(*kind)),
            _ => "JSONB".to_string(),
        },
        StorageType::List(_) | StorageType::Set(_) | StorageType::Map(_, _) | StorageType::Record(_) => {
            "JSONB".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphdb_codec::{descriptor_of, structure};

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        id: i64,
        customer: String,
        total: f64,
        lines: Vec<String>,
    }
    structure!(Order {
        id: i64,
        customer: String,
        total: f64,
        lines: Vec<String>,
    });

    fn schema() -> RelationalSchema {
        let options = TableOptions::new().with_index("customer").with_index("lines");
        RelationalSchema::derive("shop", &descriptor_of::<Order>(), "id", &options, &MapFormat::soa())
    }

    #[test]
    fn create_table_then_add_every_column() {
        let statements = schema().create_statements();
        assert_eq!(
            statements[0].to_string(),
            "CREATE TABLE IF NOT EXISTS \"shop\".\"order\" (\"id\" BIGINT NOT NULL, \
             \"customer\" TEXT COLLATE \"C\", \"total\" DOUBLE PRECISION, \
             \"lines\" TEXT[] COLLATE \"C\", PRIMARY KEY (\"id\"))"
        );
        let added: Vec<String> = statements
            .iter()
            .filter_map(|s| match s {
                SqlStatement::AddColumn { column, .. } => Some(column.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(added, vec!["customer", "total", "lines"]);
        assert_eq!(
            statements[1].to_string(),
            "ALTER TABLE \"shop\".\"order\" ADD COLUMN IF NOT EXISTS \"customer\" TEXT COLLATE \"C\""
        );
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Review {
        id: String,
        stars: i64,
        verified: bool,
        note: Option<String>,
    }
    structure!(Review {
        id: String,
        stars: i64 = 3,
        verified: bool = false,
        note: Option<String>,
    });

    #[test]
    fn declared_defaults_backfill_added_columns() {
        let schema = RelationalSchema::derive(
            "shop",
            &descriptor_of::<Review>(),
            "id",
            &TableOptions::new(),
            &MapFormat::soa(),
        );
        assert_eq!(
            schema.defaults,
            BTreeMap::from([
                ("stars".to_string(), Value::Integer(3)),
                ("verified".to_string(), Value::Bool(false)),
            ])
        );
        let added: Vec<String> = schema
            .create_statements()
            .iter()
            .filter(|s| s.kind() == "add column")
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            added,
            vec![
                "ALTER TABLE \"shop\".\"review\" ADD COLUMN IF NOT EXISTS \"stars\" BIGINT DEFAULT 3",
                "ALTER TABLE \"shop\".\"review\" ADD COLUMN IF NOT EXISTS \"verified\" BOOLEAN DEFAULT FALSE",
                "ALTER TABLE \"shop\".\"review\" ADD COLUMN IF NOT EXISTS \"note\" TEXT COLLATE \"C\"",
            ]
        );
    }

    #[test]
    fn array_indexes_use_gin() {
        let statements = schema().create_statements();
        let indexes: Vec<String> = statements
            .iter()
            .filter(|s| s.kind() == "create index")
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            indexes,
            vec![
                "CREATE INDEX IF NOT EXISTS \"order_customer_idx\" ON \"shop\".\"order\" (\"customer\")",
                "CREATE INDEX IF NOT EXISTS \"order_lines_idx\" ON \"shop\".\"order\" USING GIN (\"lines\")",
            ]
        );
    }
}
