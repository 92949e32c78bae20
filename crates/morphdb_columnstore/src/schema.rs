//! Table layout and DDL.

use crate::statement::CqlStatement;
use morphdb_codec::{
    ColumnDef, ColumnPlan, FieldKind, GeoPoint, MapFormat, PrimitiveKind, StorageType,
    TypeDescriptor,
};
use morphdb_core::TableOptions;

/// Suffix of the geohash column written next to every geo point.
pub const GEOHASH_SUFFIX: &str = "geohash";

/// Physical layout of one record type in the column store.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Keyspace.
    pub keyspace: String,
    /// Table name.
    pub table: String,
    /// Partition key column.
    pub key_column: String,
    /// Columns derived from the record descriptor.
    pub plan: ColumnPlan,
    /// Dotted paths of geo point fields.
    pub geo_fields: Vec<String>,
    /// Columns with a secondary index.
    pub indexed: Vec<String>,
}

impl TableSchema {
    /// Derives the layout of a record type.
    pub fn derive(
        keyspace: &str,
        descriptor: &TypeDescriptor,
        key_field: &str,
        options: &TableOptions,
        format: &MapFormat,
    ) -> Self {
        let mut geo_fields = Vec::new();
        collect_geo_fields(descriptor, "", &mut geo_fields);
        Self {
            keyspace: keyspace.to_string(),
            table: options.resolve_name(descriptor.name),
            key_column: format.column_path(key_field),
            plan: format.column_plan(descriptor),
            geo_fields,
            indexed: options
                .indexed
                .iter()
                .map(|field| format.column_path(field))
                .collect(),
        }
    }

    /// `keyspace.table`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    /// Name of the geohash column for a geo field.
    pub fn geohash_column(&self, format: &MapFormat, field: &str) -> String {
        format.join(&format.column_path(field), GEOHASH_SUFFIX)
    }

    /// Returns true if the column can be queried without filtering.
    pub fn is_indexed(&self, column: &str) -> bool {
        column == self.key_column || self.indexed.iter().any(|c| c == column)
    }

    /// Every column, geohash columns included.
    pub fn columns(&self, format: &MapFormat) -> Vec<ColumnDef> {
        let mut columns = self.plan.columns().to_vec();
        for field in &self.geo_fields {
            columns.push(ColumnDef::new(
                self.geohash_column(format, field),
                StorageType::Scalar(PrimitiveKind::Text),
                true,
            ));
        }
        columns
    }

    /// `CREATE TABLE` and `CREATE INDEX` statements, all idempotent.
    pub fn create_statements(&self, format: &MapFormat) -> Vec<CqlStatement> {
        let table = self.qualified();
        let mut statements = vec![CqlStatement::CreateTable {
            table: table.clone(),
            columns: self
                .columns(format)
                .iter()
                .map(|c| (c.name.clone(), cql_type(&c.storage)))
                .collect(),
            key_column: self.key_column.clone(),
        }];
        for column in &self.indexed {
            statements.push(CqlStatement::CreateIndex {
                table: table.clone(),
                column: column.clone(),
                prefix: false,
            });
        }
        for field in &self.geo_fields {
            statements.push(CqlStatement::CreateIndex {
                table: table.clone(),
                column: self.geohash_column(format, field),
                prefix: true,
            });
        }
        statements
    }
}

fn collect_geo_fields(descriptor: &TypeDescriptor, prefix: &str, out: &mut Vec<String>) {
    for field in &descriptor.fields {
        let path = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };
        if let FieldKind::Nested(nested) = field.kind.unwrapped() {
            if nested.type_name == GeoPoint::type_name() {
                out.push(path);
            } else {
                collect_geo_fields(nested, &path, out);
            }
        }
    }
}

/// CQL type of a storage type. Collections nested in collections are frozen.
pub fn cql_type(storage: &StorageType) -> String {
    fn inner(storage: &StorageType) -> String {
        match storage {
            StorageType::Scalar(_) => cql_type(storage),
            other => format!("frozen<{}>", cql_type(other)),
        }
    }
    match storage {
        StorageType::Scalar(PrimitiveKind::Bool) => "boolean".into(),
        StorageType::Scalar(PrimitiveKind::Integer) => "bigint".into(),
        StorageType::Scalar(PrimitiveKind::Float) => "double".into(),
        StorageType::Scalar(PrimitiveKind::Text) => "text".into(),
        StorageType::Scalar(PrimitiveKind::Bytes) => "blob".into(),
        StorageType::Array(element) | StorageType::List(element) => {
            format!("list<{}>", inner(element))
        }
        StorageType::Set(element) => format!("set<{}>", inner(element)),
        StorageType::Map(key, value) => format!("map<{}, {}>", inner(key), inner(value)),
        StorageType::Record(fields) => {
            let types: Vec<String> = fields.iter().map(|(_, t)| inner(t)).collect();
            format!("tuple<{}>", types.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_types_freeze_inner_collections() {
        let text = || Box::new(StorageType::Scalar(PrimitiveKind::Text));
        assert_eq!(cql_type(&StorageType::List(text())), "list<text>");
        assert_eq!(
            cql_type(&StorageType::Map(
                text(),
                Box::new(StorageType::Set(Box::new(StorageType::Scalar(PrimitiveKind::Integer))))
            )),
            "map<text, frozen<set<bigint>>>"
        );
        assert_eq!(
            cql_type(&StorageType::List(Box::new(StorageType::Record(vec![
                ("a".into(), StorageType::Scalar(PrimitiveKind::Float)),
                ("b".into(), StorageType::Scalar(PrimitiveKind::Bool)),
            ])))),
            "list<frozen<tuple<double, boolean>>>"
        );
    }
}
