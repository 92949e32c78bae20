//! Lowering of normalized conditions to CQL selects.
//!
//! CQL has no `OR`, no negation and cannot match nulls, so a condition is
//! lowered to a disjunction of branches, each a conjunction of restrictions
//! that selects a superset of the matching rows. Terms that cannot be
//! expressed leave their branch unrestricted. The adapter evaluates the
//! full condition on every fetched row, so pre-filters only have to be
//! loose, never exact.

use crate::schema::TableSchema;
use crate::statement::{CqlStatement, Operator, Restriction};
use morphdb_codec::{FieldDescriptor, FieldKind, GeoPoint, MapFormat, StorageType, TypeDescriptor, Value};
use morphdb_core::geo::geohash;
use morphdb_core::Condition;

/// Branch count past which a disjunction is read as one full scan instead.
pub const MAX_BRANCHES: usize = 256;

type Branches = Vec<Vec<Restriction>>;

fn unrestricted() -> Branches {
    vec![Vec::new()]
}

fn single(column: &str, operator: Operator, value: Option<Value>) -> Branches {
    match value {
        Some(value) => vec![vec![Restriction::new(column, operator, value)]],
        None => unrestricted(),
    }
}

fn product(left: Branches, right: &Branches) -> Branches {
    if left.len().saturating_mul(right.len()) > MAX_BRANCHES {
        // Keep the narrower side so the result is still a superset.
        return if left.len() <= right.len() { left } else { right.clone() };
    }
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in &left {
        for r in right {
            let mut branch = l.clone();
            branch.extend(r.iter().cloned());
            out.push(branch);
        }
    }
    out
}

/// Selects for one query plus their classification.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredQuery {
    /// One select per branch. Empty when the condition can never match.
    pub statements: Vec<CqlStatement>,
    /// True when some branch is not served by the partition key or an index.
    pub requires_full_scan: bool,
    /// Referenced fields without an index.
    pub unindexed_fields: Vec<String>,
}

/// Lowers conditions for one table.
pub struct Lowerer<'a> {
    format: &'a MapFormat,
    descriptor: &'a TypeDescriptor,
    schema: &'a TableSchema,
}

impl<'a> Lowerer<'a> {
    /// Creates a lowerer.
    pub fn new(format: &'a MapFormat, descriptor: &'a TypeDescriptor, schema: &'a TableSchema) -> Self {
        Self {
            format,
            descriptor,
            schema,
        }
    }

    /// Lowers a normalized condition into selects.
    pub fn plan(&self, condition: &Condition) -> LoweredQuery {
        let mut branches = self.record(condition, "");
        branches.dedup();

        let table = self.schema.qualified();
        let mut requires_full_scan = false;
        let statements = branches
            .into_iter()
            .map(|restrictions| {
                if !restrictions.iter().any(|r| self.served(r)) {
                    requires_full_scan = true;
                }
                let allow_filtering = restrictions.iter().any(|r| !self.served(r));
                CqlStatement::Select {
                    table: table.clone(),
                    restrictions,
                    allow_filtering,
                }
            })
            .collect();

        let unindexed_fields = condition
            .referenced_fields()
            .into_iter()
            .filter(|field| {
                !self.schema.is_indexed(&self.format.column_path(field))
                    && !self.schema.geo_fields.contains(field)
            })
            .collect();

        LoweredQuery {
            statements,
            requires_full_scan,
            unindexed_fields,
        }
    }

    /// Returns true if the backend can serve a restriction without filtering.
    fn served(&self, restriction: &Restriction) -> bool {
        let column = restriction.column.as_str();
        match restriction.operator {
            Operator::Eq => self.schema.is_indexed(column),
            Operator::In => column == self.schema.key_column,
            Operator::Contains | Operator::ContainsKey => {
                column != self.schema.key_column && self.schema.is_indexed(column)
            }
            Operator::Like => self
                .schema
                .geo_fields
                .iter()
                .any(|f| self.schema.geohash_column(self.format, f) == column),
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => false,
        }
    }

    /// Resolves a dotted path to its kind and whether any segment is
    /// nullable.
    fn resolve(&self, dotted: &str) -> Option<(&'a FieldKind, bool)> {
        let mut fields: &'a [FieldDescriptor] = &self.descriptor.fields;
        let mut found = None;
        let mut nullable = false;
        for segment in dotted.split('.') {
            let field = fields.iter().find(|f| f.name == segment)?;
            nullable |= field.kind.is_nullable();
            found = Some(&field.kind);
            fields = match field.kind.unwrapped() {
                FieldKind::Nested(nested) => &nested.fields,
                _ => &[],
            };
        }
        found.map(|kind| (kind, nullable))
    }

    /// Handles the connectives shared by record and field context.
    fn junction(&self, condition: &Condition, lower: &dyn Fn(&Condition) -> Branches) -> Option<Branches> {
        match condition {
            Condition::Always => Some(unrestricted()),
            Condition::Never => Some(Vec::new()),
            Condition::And(children) => {
                let mut acc = unrestricted();
                for child in children {
                    acc = product(acc, &lower(child));
                    if acc.is_empty() {
                        break;
                    }
                }
                Some(acc)
            }
            Condition::Or(children) => {
                let mut acc = Vec::new();
                for child in children {
                    let branches = lower(child);
                    if branches.iter().any(Vec::is_empty) {
                        return Some(unrestricted());
                    }
                    acc.extend(branches);
                    if acc.len() > MAX_BRANCHES {
                        return Some(unrestricted());
                    }
                }
                Some(acc)
            }
            _ => None,
        }
    }

    fn record(&self, condition: &Condition, prefix: &str) -> Branches {
        if let Some(branches) = self.junction(condition, &|c| self.record(c, prefix)) {
            return branches;
        }
        let Condition::OnField { field, condition } = condition else {
            return unrestricted();
        };
        let dotted = if prefix.is_empty() {
            field.clone()
        } else {
            format!("{prefix}.{field}")
        };
        let Some((kind, nullable)) = self.resolve(&dotted) else {
            return unrestricted();
        };
        let is_record = matches!(
            kind.unwrapped(),
            FieldKind::Nested(nested) if nested.type_name != GeoPoint::type_name()
        );
        let structural = matches!(
            condition.as_ref(),
            Condition::OnField { .. } | Condition::And(_) | Condition::Or(_)
        );
        if is_record && structural {
            self.record(condition, &dotted)
        } else {
            self.field(condition, &dotted, kind, nullable)
        }
    }

    fn field(&self, condition: &Condition, dotted: &str, kind: &FieldKind, nullable: bool) -> Branches {
        if let Some(branches) =
            self.junction(condition, &|c| self.field(c, dotted, kind, nullable))
        {
            return branches;
        }
        let column = self.format.column_path(dotted);
        let scalar = |kind: &FieldKind| matches!(self.format.storage_type(kind), StorageType::Scalar(_));
        let stored = |kind: &FieldKind, value: &Value| {
            if value.is_null() {
                None
            } else {
                self.format.to_storage_value(&column, kind, value).ok()
            }
        };

        match condition {
            Condition::Equal(v) if scalar(kind) => single(&column, Operator::Eq, stored(kind, v)),
            Condition::GreaterThan(v) if scalar(kind) => single(&column, Operator::Gt, stored(kind, v)),
            Condition::GreaterThanOrEqual(v) if scalar(kind) => {
                single(&column, Operator::Gte, stored(kind, v))
            }
            // Null sorts first, so `< v` also matches null columns.
            Condition::LessThan(v) if scalar(kind) && !nullable => {
                single(&column, Operator::Lt, stored(kind, v))
            }
            Condition::LessThanOrEqual(v) if scalar(kind) && !nullable => {
                single(&column, Operator::Lte, stored(kind, v))
            }
            Condition::Inside(values) if scalar(kind) => {
                if values.is_empty() {
                    return Vec::new();
                }
                let options: Option<Vec<Value>> = values.iter().map(|v| stored(kind, v)).collect();
                single(&column, Operator::In, options.map(Value::List))
            }
            Condition::IfNotNull(inner) => self.field(inner, dotted, kind, false),
            Condition::ListAnyElements(inner) => match (kind.unwrapped(), inner.as_ref()) {
                (FieldKind::List(element) | FieldKind::Set(element), Condition::Equal(v))
                    if scalar(element) =>
                {
                    single(&column, Operator::Contains, stored(element, v))
                }
                _ => unrestricted(),
            },
            Condition::MapHasKey(key) => match kind.unwrapped() {
                FieldKind::Map(key_kind, _) if scalar(key_kind) => {
                    single(&column, Operator::ContainsKey, stored(key_kind, key))
                }
                _ => unrestricted(),
            },
            Condition::GeoDistance {
                center,
                less_than_km,
                ..
            } if self.schema.geo_fields.iter().any(|f| f == dotted) => {
                let Some(cells) = geohash::covering_cells(center, *less_than_km) else {
                    return unrestricted();
                };
                let geohash_column = self.schema.geohash_column(self.format, dotted);
                cells
                    .into_iter()
                    .map(|cell| {
                        vec![Restriction::new(
                            geohash_column.clone(),
                            Operator::Like,
                            Value::Text(format!("{cell}%")),
                        )]
                    })
                    .collect()
            }
            _ => unrestricted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphdb_codec::{descriptor_of, structure};
    use morphdb_core::{normalize, TableOptions};

    #[derive(Debug, Clone, PartialEq)]
    struct Home {
        city: String,
    }
    structure!(Home { city: String });

    #[derive(Debug, Clone, PartialEq)]
    struct Shop {
        id: String,
        rating: i64,
        discount: Option<i64>,
        email: String,
        home: Option<Home>,
        tags: Vec<String>,
        location: GeoPoint,
    }
    structure!(Shop {
        id: String,
        rating: i64,
        discount: Option<i64>,
        email: String,
        home: Option<Home>,
        tags: Vec<String>,
        location: GeoPoint,
    });

    fn lowered(condition: Condition) -> LoweredQuery {
        let format = MapFormat::native();
        let descriptor = descriptor_of::<Shop>();
        let options = TableOptions::new().with_index("email").with_index("tags");
        let schema = TableSchema::derive("ks", &descriptor, "id", &options, &format);
        Lowerer::new(&format, &descriptor, &schema).plan(&normalize(&condition))
    }

    fn restrictions(statement: &CqlStatement) -> &[Restriction] {
        match statement {
            CqlStatement::Select { restrictions, .. } => restrictions,
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn key_lookup_is_indexed() {
        let q = lowered(Condition::field_eq("id", "a"));
        assert_eq!(q.statements.len(), 1);
        assert!(!q.requires_full_scan);
        assert_eq!(q.statements[0].to_string(), "SELECT * FROM ks.shop WHERE id = ?");
    }

    #[test]
    fn unindexed_range_needs_filtering_and_a_scan() {
        let q = lowered(Condition::on_field("rating", Condition::GreaterThan(3.into())));
        assert!(q.requires_full_scan);
        assert_eq!(q.unindexed_fields, vec!["rating"]);
        assert_eq!(
            q.statements[0].to_string(),
            "SELECT * FROM ks.shop WHERE rating > ? ALLOW FILTERING"
        );
    }

    #[test]
    fn indexed_conjunct_serves_the_branch() {
        let q = lowered(Condition::and([
            Condition::field_eq("email", "a@b.c"),
            Condition::on_field("rating", Condition::GreaterThan(3.into())),
        ]));
        assert!(!q.requires_full_scan);
        assert_eq!(restrictions(&q.statements[0]).len(), 2);
    }

    #[test]
    fn disjunctions_fan_out() {
        let q = lowered(Condition::or((0..5).map(|i| Condition::field_eq("id", i.to_string()))));
        assert_eq!(q.statements.len(), 5);
        assert!(!q.requires_full_scan);
    }

    #[test]
    fn disjunction_with_unrestricted_branch_is_one_scan() {
        let q = lowered(Condition::or([
            Condition::field_eq("id", "a"),
            Condition::on_field("email", Condition::NotEqual("x".into())),
        ]));
        assert_eq!(q.statements.len(), 1);
        assert!(restrictions(&q.statements[0]).is_empty());
        assert!(q.requires_full_scan);
    }

    #[test]
    fn less_than_on_nullable_column_is_not_pushed_down() {
        let q = lowered(Condition::on_field("discount", Condition::LessThan(5.into())));
        assert!(restrictions(&q.statements[0]).is_empty());

        let q = lowered(Condition::on_field(
            "discount",
            Condition::IfNotNull(Box::new(Condition::LessThan(5.into()))),
        ));
        assert_eq!(restrictions(&q.statements[0])[0].operator, Operator::Lt);
    }

    #[test]
    fn nested_fields_use_flattened_columns() {
        let q = lowered(Condition::on_field("home", Condition::field_eq("city", "Oslo")));
        assert_eq!(restrictions(&q.statements[0])[0].column, "home__city");
    }

    #[test]
    fn list_membership_uses_contains() {
        let q = lowered(Condition::on_field(
            "tags",
            Condition::ListAnyElements(Box::new(Condition::Equal("vip".into()))),
        ));
        assert!(!q.requires_full_scan);
        assert_eq!(restrictions(&q.statements[0])[0].operator, Operator::Contains);
    }

    #[test]
    fn geo_distance_becomes_prefix_branches() {
        let q = lowered(Condition::on_field(
            "location",
            Condition::within_km(GeoPoint::new(59.91, 10.75), 2.0),
        ));
        assert_eq!(q.statements.len(), 9);
        assert!(!q.requires_full_scan);
        assert!(q.unindexed_fields.is_empty());
        let r = &restrictions(&q.statements[0])[0];
        assert_eq!(r.column, "location__geohash");
        assert_eq!(r.operator, Operator::Like);
    }

    #[test]
    fn never_issues_no_statement() {
        let q = lowered(Condition::and([
            Condition::field_eq("id", "a"),
            Condition::on_field("id", Condition::Inside(Vec::new())),
        ]));
        assert!(q.statements.is_empty());
        assert!(!q.requires_full_scan);
    }
}
