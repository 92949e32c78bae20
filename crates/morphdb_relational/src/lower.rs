//! Lowering of normalized conditions and modifications to SQL fragments.
//!
//! Each condition term lowers to one of three fragments:
//!
//! - exact: the expression selects precisely the matching rows
//! - loose: the expression selects a superset of them
//! - opaque: nothing useful can be said in SQL
//!
//! Conjunctions keep what they can and drop opaque children, disjunctions
//! need every child, and negation needs an exact operand. When the final
//! fragment is not exact the adapter evaluates the condition on the
//! fetched rows as well.

use crate::schema::RelationalSchema;
use crate::statement::{escape_like, Comparison, SetExpr, SqlExpr};
use morphdb_codec::{FieldDescriptor, FieldKind, GeoPoint, MapFormat, PrimitiveKind, StorageType, TypeDescriptor, Value};
use morphdb_core::geo::EARTH_RADIUS_KM;
use morphdb_core::{Condition, Modification};
use std::collections::BTreeSet;

/// A lowered condition term.
#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    Exact(SqlExpr),
    Loose(SqlExpr),
    Opaque,
}

impl Fragment {
    fn and(parts: Vec<Fragment>) -> Fragment {
        let mut exact = true;
        let mut exprs = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Fragment::Exact(e) => exprs.push(e),
                Fragment::Loose(e) => {
                    exact = false;
                    exprs.push(e);
                }
                Fragment::Opaque => exact = false,
            }
        }
        let expr = SqlExpr::and(exprs);
        if exact {
            Fragment::Exact(expr)
        } else if expr == SqlExpr::Literal(true) {
            Fragment::Opaque
        } else {
            Fragment::Loose(expr)
        }
    }

    fn or(parts: Vec<Fragment>) -> Fragment {
        let mut exact = true;
        let mut exprs = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Fragment::Exact(e) => exprs.push(e),
                Fragment::Loose(e) => {
                    exact = false;
                    exprs.push(e);
                }
                Fragment::Opaque => return Fragment::Opaque,
            }
        }
        let expr = SqlExpr::or(exprs);
        if exact {
            Fragment::Exact(expr)
        } else {
            Fragment::Loose(expr)
        }
    }

    fn not(part: Fragment) -> Fragment {
        match part {
            Fragment::Exact(e) => Fragment::Exact(SqlExpr::not(e)),
            Fragment::Loose(_) | Fragment::Opaque => Fragment::Opaque,
        }
    }
}

/// A lowered `WHERE` clause plus its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredFilter {
    /// Filter to send. `TRUE` when nothing could be lowered.
    pub filter: SqlExpr,
    /// True when the filter selects exactly the matching rows, so no
    /// client-side evaluation is needed.
    pub exact: bool,
    /// True when no index serves the filter.
    pub requires_full_scan: bool,
    /// Referenced fields without an index.
    pub unindexed_fields: Vec<String>,
}

/// Lowers conditions and modifications for one table.
pub struct Lowerer<'a> {
    format: &'a MapFormat,
    descriptor: &'a TypeDescriptor,
    schema: &'a RelationalSchema,
}

impl<'a> Lowerer<'a> {
    /// Creates a lowerer.
    pub fn new(format: &'a MapFormat, descriptor: &'a TypeDescriptor, schema: &'a RelationalSchema) -> Self {
        Self {
            format,
            descriptor,
            schema,
        }
    }

    /// Lowers a normalized condition into a `WHERE` clause.
    pub fn filter(&self, condition: &Condition) -> LoweredFilter {
        let (filter, exact) = match self.record(condition, "") {
            Fragment::Exact(e) => (e, true),
            Fragment::Loose(e) => (e, false),
            Fragment::Opaque => (SqlExpr::Literal(true), false),
        };
        let requires_full_scan = !self.served(&filter);
        let unindexed_fields = condition
            .referenced_fields()
            .into_iter()
            .filter(|field| !self.schema.is_indexed(&self.format.column_path(field)))
            .collect();
        LoweredFilter {
            filter,
            exact,
            requires_full_scan,
            unindexed_fields,
        }
    }

    /// Lowers a normalized modification into `SET` assignments, or `None`
    /// if some part can only be applied client-side.
    pub fn assignments(&self, modification: &Modification) -> Option<Vec<(String, SetExpr)>> {
        let mut out = Vec::new();
        self.collect_assignments(modification, &mut out)?;
        let distinct: BTreeSet<&str> = out.iter().map(|(c, _)| c.as_str()).collect();
        if distinct.len() != out.len() || out.is_empty() {
            return None;
        }
        Some(out)
    }

    /// Returns true if an index narrows every row the filter can match.
    fn served(&self, expr: &SqlExpr) -> bool {
        match expr {
            SqlExpr::Literal(false) => true,
            SqlExpr::Compare {
                column,
                op: Comparison::Eq,
                ..
            }
            | SqlExpr::In { column, .. }
            | SqlExpr::ArrayContains { column, .. } => self.schema.is_indexed(column),
            SqlExpr::And(children) => children.iter().any(|c| self.served(c)),
            SqlExpr::Or(children) => !children.is_empty() && children.iter().all(|c| self.served(c)),
            _ => false,
        }
    }

    /// Resolves a dotted path to its kind, whether any segment is
    /// nullable, and whether any segment above the last is.
    fn resolve(&self, dotted: &str) -> Option<(&'a FieldKind, bool, bool)> {
        let mut fields: &'a [FieldDescriptor] = &self.descriptor.fields;
        let mut found = None;
        let mut nullable = false;
        let mut parent_nullable = false;
        for segment in dotted.split('.') {
            let field = fields.iter().find(|f| f.name == segment)?;
            parent_nullable = nullable;
            nullable |= field.kind.is_nullable();
            found = Some(&field.kind);
            fields = match field.kind.unwrapped() {
                FieldKind::Nested(nested) => &nested.fields,
                _ => &[],
            };
        }
        found.map(|kind| (kind, nullable, parent_nullable))
    }

    /// Scalar kind of a plain column, if `column` is one.
    fn scalar_column(&self, column: &str) -> Option<PrimitiveKind> {
        match &self.schema.column(column)?.storage {
            StorageType::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    fn array_column(&self, column: &str) -> bool {
        self.schema
            .column(column)
            .is_some_and(|c| matches!(&c.storage, StorageType::Array(e) if matches!(**e, StorageType::Scalar(_))))
    }

    /// Handles the connectives shared by record and field context.
    fn junction(&self, condition: &Condition, lower: &dyn Fn(&Condition) -> Fragment) -> Option<Fragment> {
        match condition {
            Condition::Always => Some(Fragment::Exact(SqlExpr::Literal(true))),
            Condition::Never => Some(Fragment::Exact(SqlExpr::Literal(false))),
            Condition::And(children) => Some(Fragment::and(children.iter().map(lower).collect())),
            Condition::Or(children) => Some(Fragment::or(children.iter().map(lower).collect())),
            Condition::Not(inner) => Some(Fragment::not(lower(inner))),
            _ => None,
        }
    }

    fn record(&self, condition: &Condition, prefix: &str) -> Fragment {
        if let Some(fragment) = self.junction(condition, &|c| self.record(c, prefix)) {
            return fragment;
        }
        let Condition::OnField { field, condition } = condition else {
            return Fragment::Opaque;
        };
        let dotted = if prefix.is_empty() {
            field.clone()
        } else {
            format!("{prefix}.{field}")
        };
        let Some((kind, nullable, _)) = self.resolve(&dotted) else {
            return Fragment::Opaque;
        };
        if Self::is_record(kind) && Self::structural(condition) {
            self.record(condition, &dotted)
        } else {
            self.field(condition, &dotted, kind, nullable)
        }
    }

    fn is_record(kind: &FieldKind) -> bool {
        matches!(
            kind.unwrapped(),
            FieldKind::Nested(nested) if nested.type_name != GeoPoint::type_name()
        )
    }

    fn structural(condition: &Condition) -> bool {
        matches!(
            condition,
            Condition::OnField { .. } | Condition::And(_) | Condition::Or(_)
        )
    }

    /// `IS NOT NULL` for the subtree at `dotted`.
    fn present(&self, dotted: &str) -> Fragment {
        let column = self.format.column_path(dotted);
        let presence = self.format.presence_column(&column);
        if self.schema.column(&column).is_some() {
            Fragment::Exact(SqlExpr::IsNotNull(column))
        } else if self.schema.column(&presence).is_some() {
            Fragment::Exact(SqlExpr::Flag(presence))
        } else {
            Fragment::Opaque
        }
    }

    fn field(&self, condition: &Condition, dotted: &str, kind: &FieldKind, nullable: bool) -> Fragment {
        if let Some(fragment) =
            self.junction(condition, &|c| self.field(c, dotted, kind, nullable))
        {
            return fragment;
        }
        if let Condition::IfNotNull(inner) = condition {
            let rest = if Self::is_record(kind) && Self::structural(inner) {
                self.record(inner, dotted)
            } else {
                self.field(inner, dotted, kind, false)
            };
            return Fragment::and(vec![self.present(dotted), rest]);
        }
        if let Condition::GeoDistance {
            center,
            less_than_km,
            ..
        } = condition
        {
            return self.geo_box(dotted, center, *less_than_km);
        }

        let column = self.format.column_path(dotted);
        match condition {
            Condition::Equal(v) if v.is_null() => Fragment::not(self.present(dotted)),
            Condition::NotEqual(v) if v.is_null() => self.present(dotted),
            Condition::ListAnyElements(inner) => self.any_element(inner, &column, kind),
            Condition::ListAllElements(inner) => match (kind.unwrapped(), inner.as_ref()) {
                // Every element differs from `v` iff none equals it.
                (FieldKind::List(_) | FieldKind::Set(_), Condition::NotEqual(v)) if !v.is_null() => {
                    Fragment::not(self.any_element(&Condition::Equal(v.clone()), &column, kind))
                }
                _ => Fragment::Opaque,
            },
            Condition::ListSizeEquals(size) => match self.length_column(&column, kind) {
                Some(length_column) => Fragment::Exact(SqlExpr::Cardinality {
                    column: length_column,
                    size: *size,
                }),
                None => Fragment::Opaque,
            },
            Condition::MapHasKey(key) => match kind.unwrapped() {
                FieldKind::Map(key_kind, _) if self.array_column(&column) && !key.is_null() => {
                    match self.format.to_storage_value(&column, key_kind, key) {
                        Ok(value) => Fragment::Exact(SqlExpr::ArrayContains { column, value }),
                        Err(_) => Fragment::Opaque,
                    }
                }
                _ => Fragment::Opaque,
            },
            Condition::StringContains { value, ignore_case } => {
                if self.scalar_column(&column) != Some(PrimitiveKind::Text)
                    || self.format.converters().for_kind(kind).is_some()
                    || (*ignore_case && !ilike_agrees_with_lowercase(value))
                {
                    return Fragment::Opaque;
                }
                Fragment::Exact(SqlExpr::Like {
                    column,
                    pattern: format!("%{}%", escape_like(value)),
                    case_insensitive: *ignore_case,
                })
            }
            other => self.comparison(other, column, kind, nullable),
        }
    }

    /// Ordering and membership comparisons on a scalar column.
    fn comparison(&self, condition: &Condition, column: String, kind: &FieldKind, nullable: bool) -> Fragment {
        if self.scalar_column(&column).is_none() {
            return Fragment::Opaque;
        }
        // Converted values only keep equality, not order.
        let ordered = self.format.converters().for_kind(kind).is_none();
        let stored = |v: &Value| self.format.to_storage_value(&column, kind, v).ok();
        let compare = |op: Comparison, v: &Value| match stored(v) {
            Some(value) => Fragment::Exact(SqlExpr::Compare {
                column: column.clone(),
                op,
                value,
            }),
            None => Fragment::Opaque,
        };
        // Null sorts before everything.
        let or_null = |fragment: Fragment| {
            if nullable {
                Fragment::or(vec![fragment, Fragment::Exact(SqlExpr::IsNull(column.clone()))])
            } else {
                fragment
            }
        };
        match condition {
            Condition::Equal(v) => compare(Comparison::Eq, v),
            Condition::NotEqual(v) => match stored(v) {
                Some(value) => Fragment::Exact(SqlExpr::DistinctFrom {
                    column: column.clone(),
                    value,
                }),
                None => Fragment::Opaque,
            },
            Condition::Inside(values) => self.inside(&column, kind, values),
            Condition::NotInside(values) => Fragment::not(self.inside(&column, kind, values)),
            _ if !ordered => Fragment::Opaque,
            Condition::GreaterThan(v) if v.is_null() => {
                Fragment::Exact(SqlExpr::IsNotNull(column.clone()))
            }
            Condition::GreaterThanOrEqual(v) if v.is_null() => Fragment::Exact(SqlExpr::Literal(true)),
            Condition::LessThan(v) if v.is_null() => Fragment::Exact(SqlExpr::Literal(false)),
            Condition::LessThanOrEqual(v) if v.is_null() => {
                Fragment::Exact(SqlExpr::IsNull(column.clone()))
            }
            Condition::GreaterThan(v) => compare(Comparison::Gt, v),
            Condition::GreaterThanOrEqual(v) => compare(Comparison::Gte, v),
            Condition::LessThan(v) => or_null(compare(Comparison::Lt, v)),
            Condition::LessThanOrEqual(v) => or_null(compare(Comparison::Lte, v)),
            _ => Fragment::Opaque,
        }
    }

    fn inside(&self, column: &str, kind: &FieldKind, values: &[Value]) -> Fragment {
        let with_null = values.iter().any(Value::is_null);
        let options: Option<Vec<Value>> = values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| self.format.to_storage_value(column, kind, v).ok())
            .collect();
        let Some(options) = options else {
            return Fragment::Opaque;
        };
        let listed = if options.is_empty() {
            SqlExpr::Literal(false)
        } else {
            SqlExpr::In {
                column: column.to_string(),
                values: options,
            }
        };
        if with_null {
            Fragment::Exact(SqlExpr::or([listed, SqlExpr::IsNull(column.to_string())]))
        } else {
            Fragment::Exact(listed)
        }
    }

    /// Array containment for element equality, on lists of scalars or on
    /// one scalar field of a list of records.
    fn any_element(&self, inner: &Condition, column: &str, kind: &FieldKind) -> Fragment {
        let (FieldKind::List(element) | FieldKind::Set(element)) = kind.unwrapped() else {
            return Fragment::Opaque;
        };
        match inner {
            Condition::Equal(v) if !v.is_null() && self.array_column(column) => {
                match self.format.to_storage_value(column, element, v) {
                    Ok(value) => Fragment::Exact(SqlExpr::ArrayContains {
                        column: column.to_string(),
                        value,
                    }),
                    Err(_) => Fragment::Opaque,
                }
            }
            Condition::OnField { field, condition } if !field.contains('.') => {
                let FieldKind::Nested(nested) = element.unwrapped() else {
                    return Fragment::Opaque;
                };
                let Some(sub) = nested.field(field) else {
                    return Fragment::Opaque;
                };
                let sub_column = self.format.join(column, field);
                match condition.as_ref() {
                    Condition::Equal(v) if !v.is_null() && self.array_column(&sub_column) => {
                        match self.format.to_storage_value(&sub_column, &sub.kind, v) {
                            Ok(value) => Fragment::Exact(SqlExpr::ArrayContains {
                                column: sub_column,
                                value,
                            }),
                            Err(_) => Fragment::Opaque,
                        }
                    }
                    _ => Fragment::Opaque,
                }
            }
            _ => Fragment::Opaque,
        }
    }

    /// An array column whose length is the collection's length.
    fn length_column(&self, column: &str, kind: &FieldKind) -> Option<String> {
        if !kind.unwrapped().is_collection() {
            return None;
        }
        self.schema
            .plan
            .under(column, self.format.separator())
            .into_iter()
            .find(|c| matches!(c.storage, StorageType::Array(_)))
            .map(|c| c.name.clone())
    }

    /// A latitude/longitude box around the circle, as a superset.
    fn geo_box(&self, dotted: &str, center: &GeoPoint, radius_km: f64) -> Fragment {
        let column = self.format.column_path(dotted);
        let latitude = self.format.join(&column, "latitude");
        let longitude = self.format.join(&column, "longitude");
        if self.scalar_column(&latitude).is_none() || self.scalar_column(&longitude).is_none() {
            return Fragment::Opaque;
        }
        let Some((lat_min, lat_max, lon_min, lon_max)) = bounding_box(center, radius_km) else {
            return Fragment::Opaque;
        };
        let bound = |column: &str, op, degrees: f64| SqlExpr::Compare {
            column: column.to_string(),
            op,
            value: Value::Float(degrees),
        };
        Fragment::Loose(SqlExpr::and([
            bound(&latitude, Comparison::Gte, lat_min),
            bound(&latitude, Comparison::Lte, lat_max),
            bound(&longitude, Comparison::Gte, lon_min),
            bound(&longitude, Comparison::Lte, lon_max),
        ]))
    }

    fn collect_assignments(&self, modification: &Modification, out: &mut Vec<(String, SetExpr)>) -> Option<()> {
        match modification {
            Modification::Chain(items) => {
                for item in items {
                    self.collect_assignments(item, out)?;
                }
                Some(())
            }
            Modification::OnField {
                field,
                modification,
            } => {
                out.push(self.assignment(field, modification)?);
                Some(())
            }
            _ => None,
        }
    }

    fn assignment(&self, dotted: &str, modification: &Modification) -> Option<(String, SetExpr)> {
        let (kind, nullable, parent_nullable) = self.resolve(dotted)?;
        // Writing below a null record fails client-side.
        if parent_nullable {
            return None;
        }
        let column = self.format.column_path(dotted);
        let storage = self.scalar_column(&column)?;
        let converted = self.format.converters().for_kind(kind).is_some();
        let numeric = |v: &Value| match (storage, v) {
            (PrimitiveKind::Integer, Value::Integer(_)) => Some(v.clone()),
            #[allow(clippy::cast_precision_loss)]
            (PrimitiveKind::Float, Value::Integer(n)) => Some(Value::Float(*n as f64)),
            (PrimitiveKind::Float, Value::Float(_)) => Some(v.clone()),
            _ => None,
        };
        let arithmetic = !nullable && !converted;
        let set = match modification {
            Modification::Assign(v) => {
                SetExpr::Value(self.format.to_storage_value(&column, kind, v).ok()?)
            }
            Modification::Increment(v) if arithmetic => SetExpr::Add(numeric(v)?),
            Modification::Multiply(v) if arithmetic => SetExpr::Multiply(numeric(v)?),
            Modification::CoerceAtMost(v) if arithmetic => SetExpr::Least(numeric(v)?),
            Modification::CoerceAtLeast(v) if arithmetic => SetExpr::Greatest(numeric(v)?),
            Modification::AppendString(s) if arithmetic && storage == PrimitiveKind::Text => {
                SetExpr::Concat(Value::Text(s.clone()))
            }
            _ => return None,
        };
        Some((column, set))
    }
}

/// Degree bounds `(lat_min, lat_max, lon_min, lon_max)` containing every
/// point closer than `radius_km` to `center`, or `None` when the box would
/// reach a pole or cross the antimeridian.
///
/// From the haversine formula, `hav(d) >= hav(dlat)` and
/// `hav(d) >= cos(lat1) cos(lat2) hav(dlon)`, so both offsets are bounded
/// by the angular radius, the longitude one scaled by the smallest cosine
/// in the latitude band.
pub fn bounding_box(center: &GeoPoint, radius_km: f64) -> Option<(f64, f64, f64, f64)> {
    const PAD: f64 = 1.01;
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return None;
    }
    let angular = radius_km / EARTH_RADIUS_KM;
    let dlat = angular.to_degrees() * PAD;
    let lat_min = center.latitude - dlat;
    let lat_max = center.latitude + dlat;
    if lat_min <= -90.0 || lat_max >= 90.0 {
        return None;
    }
    let widest = lat_min.abs().max(lat_max.abs()).to_radians().cos();
    let ratio = (angular / 2.0).sin() / widest;
    if ratio >= 1.0 {
        return None;
    }
    let dlon = (2.0 * ratio.asin()).to_degrees() * PAD;
    let lon_min = center.longitude - dlon;
    let lon_max = center.longitude + dlon;
    if lon_min <= -180.0 || lon_max >= 180.0 {
        return None;
    }
    Some((lat_min, lat_max, lon_min, lon_max))
}

/// Whether `ILIKE` on `needle` matches exactly the haystacks Unicode lowercasing does.
///
/// `ILIKE` folds ASCII only. The two non-ASCII characters whose lowercase
/// form contains ASCII are KELVIN SIGN (to `k`) and LATIN CAPITAL LETTER I
/// WITH DOT ABOVE (to `i` plus a combining dot), so an ASCII needle without
/// `k` or `i` cannot be matched through them.
fn ilike_agrees_with_lowercase(needle: &str) -> bool {
    needle.is_ascii() && !needle.chars().any(|c| matches!(c.to_ascii_lowercase(), 'k' | 'i'))
}
