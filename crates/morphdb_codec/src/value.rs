//! Dynamic record value type.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic value.
///
/// Every record flows through the codec and the condition evaluator as a
/// `Value` tree. Records keep their fields in declaration order; maps keep
/// their entries in the order produced by the source collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Double precision float.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values. Sets are encoded as lists.
    List(Vec<Value>),
    /// Map of key-value pairs.
    Map(Vec<(Value, Value)>),
    /// A structured record: field name to value, in declaration order.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Creates a record value from field pairs.
    pub fn record<K: Into<String>>(fields: Vec<(K, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns a short name of this value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Rank of the kind in the total value order.
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
            Value::Record(_) => 7,
        }
    }

    /// Returns true if ordering comparisons between the two values are
    /// meaningful: same kind family, or either side null.
    pub fn is_comparable_with(&self, other: &Self) -> bool {
        self.is_null() || other.is_null() || self.rank() == other.rank()
    }

    /// Total order over values.
    ///
    /// Null sorts before everything. Integers and floats compare exactly
    /// by numeric value, so `0.0 == -0.0` and large integers never collapse
    /// onto one float. NaN sorts by sign past every number.
    /// Values of different kinds order by kind.
    pub fn compare(&self, other: &Self) -> Ordering {
        let rank = self.rank().cmp(&other.rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Value::Integer(a), Value::Float(b)) => compare_int_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => compare_int_float(*b, *a).reverse(),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => compare_seq(a.iter(), b.iter(), Value::compare),
            (Value::Map(a), Value::Map(b)) => compare_seq(a.iter(), b.iter(), |x, y| {
                x.0.compare(&y.0).then_with(|| x.1.compare(&y.1))
            }),
            (Value::Record(a), Value::Record(b)) => compare_seq(a.iter(), b.iter(), |x, y| {
                x.0.cmp(&y.0).then_with(|| x.1.compare(&y.1))
            }),
            _ => Ordering::Equal,
        }
    }

    /// Value equality under the total order (`1 == 1.0`).
    pub fn same(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get this value's record fields, if it is a record.
    pub fn as_record(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a field in this record value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.iter().find(|(k, _)| k == field).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable lookup of a field in this record value.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        match self {
            Value::Record(fields) => fields
                .iter_mut()
                .find(|(k, _)| k == field)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get_key(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k.same(key)).map(|(_, v)| v),
            _ => None,
        }
    }
}

fn compare_seq<'a, T: 'a>(
    a: impl ExactSizeIterator<Item = &'a T>,
    b: impl ExactSizeIterator<Item = &'a T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    let (len_a, len_b) = (a.len(), b.len());
    for (x, y) in a.zip(b) {
        let ord = cmp(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    len_a.cmp(&len_b)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Compares an integer with a float without rounding the integer.
fn compare_int_float(int: i64, float: f64) -> Ordering {
    // 2^63, exactly representable.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    let whole = float.trunc();
    if whole >= LIMIT {
        return Ordering::Less;
    }
    if whole < -LIMIT {
        return Ordering::Greater;
    }
    #[allow(clippy::cast_possible_truncation)]
    let whole_int = whole as i64;
    int.cmp(&whole_int).then_with(|| {
        let fraction = float - whole;
        if fraction > 0.0 {
            Ordering::Less
        } else if fraction < 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

/// A value wrapper ordered by [`Value::compare`], usable as a map key.
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.same(&other.0)
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        let mut values = vec![
            Value::Integer(3),
            Value::Null,
            Value::Text("a".into()),
            Value::Bool(false),
        ];
        values.sort_by(Value::compare);

        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Bool(false));
        assert_eq!(values[2], Value::Integer(3));
        assert_eq!(values[3], Value::Text("a".into()));
    }

    #[test]
    fn numbers_compare_across_width() {
        assert!(Value::Integer(1).same(&Value::Float(1.0)));
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(1.5)),
            Ordering::Greater
        );
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }

    #[test]
    fn large_integers_stay_distinct_from_nearby_floats() {
        let exact = Value::Integer(1 << 53);
        let next = Value::Integer((1 << 53) + 1);
        let float = Value::Float(9_007_199_254_740_992.0);
        assert!(exact.same(&float));
        assert_eq!(next.compare(&float), Ordering::Greater);
        assert_eq!(float.compare(&next), Ordering::Less);
        assert_eq!(exact.compare(&next), Ordering::Less);

        assert_eq!(Value::Integer(i64::MAX).compare(&Value::Float(9.3e18)), Ordering::Less);
        assert_eq!(Value::Integer(i64::MIN).compare(&Value::Float(-9.3e18)), Ordering::Greater);
        assert_eq!(Value::Integer(-2).compare(&Value::Float(-1.5)), Ordering::Less);
        assert_eq!(Value::Integer(0).compare(&Value::Float(f64::NAN)), Ordering::Less);
    }

    #[test]
    fn signed_zeros_are_the_same_number() {
        assert!(Value::Float(-0.0).same(&Value::Float(0.0)));
        assert!(Value::Integer(0).same(&Value::Float(-0.0)));
    }

    #[test]
    fn list_ordering_is_lexicographic() {
        let a = Value::List(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::List(vec![Value::Integer(1), Value::Integer(3)]);
        let c = Value::List(vec![Value::Integer(1)]);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(c.compare(&a), Ordering::Less);
    }

    #[test]
    fn comparability() {
        assert!(Value::Integer(1).is_comparable_with(&Value::Float(2.0)));
        assert!(Value::Null.is_comparable_with(&Value::Text("x".into())));
        assert!(!Value::Integer(1).is_comparable_with(&Value::Text("1".into())));
    }

    #[test]
    fn record_get() {
        let record = Value::record(vec![
            ("name", Value::Text("Alice".into())),
            ("age", Value::Integer(30)),
        ]);

        assert_eq!(record.get("name"), Some(&Value::Text("Alice".into())));
        assert_eq!(record.get("age"), Some(&Value::Integer(30)));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn map_get_key_uses_value_equality() {
        let map = Value::Map(vec![(Value::Integer(1), Value::Text("one".into()))]);
        assert_eq!(
            map.get_key(&Value::Float(1.0)),
            Some(&Value::Text("one".into()))
        );
    }

    #[test]
    fn display_quotes_text() {
        assert_eq!(Value::Text("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).to_string(), "0xab01");
        assert_eq!(
            Value::List(vec![Value::Integer(1), Value::Null]).to_string(),
            "[1, null]"
        );
    }

    #[test]
    fn ordered_value_in_btree() {
        let mut set = std::collections::BTreeSet::new();
        set.insert(OrderedValue(Value::Integer(2)));
        set.insert(OrderedValue(Value::Float(2.0)));
        set.insert(OrderedValue(Value::Integer(1)));
        assert_eq!(set.len(), 2);
    }
}
