//! Sample record types and data.
//!
//! [`Person`] touches every field kind the codec handles: primitives,
//! optionals, an optional nested record, a geo point, a list of
//! primitives, a list of records and a map. [`Tagged`] covers inline
//! wrappers inside a set.

use morphdb_codec::{inline_shape, structure, GeoPoint};
use morphdb_core::Entity;
use std::collections::{BTreeMap, BTreeSet};
use tracing_subscriber::EnvFilter;

/// A postal address.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    /// Street line.
    pub street: String,
    /// City name.
    pub city: String,
    /// Postal code, if known.
    pub zip: Option<String>,
}

structure!(Address {
    street: String,
    city: String,
    zip: Option<String>,
});

/// A person record.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: i64,
    /// Contact email.
    pub email: Option<String>,
    /// Current address.
    pub home: Option<Address>,
    /// Last known position.
    pub location: GeoPoint,
    /// Free-form labels.
    pub tags: Vec<String>,
    /// Former addresses, most recent first.
    pub previous: Vec<Address>,
    /// Game ratings by game name.
    pub scores: BTreeMap<String, i64>,
}

structure!(Person {
    id: String,
    name: String,
    age: i64 = 0,
    email: Option<String>,
    home: Option<Address>,
    location: GeoPoint,
    tags: Vec<String>,
    previous: Vec<Address>,
    scores: BTreeMap<String, i64>,
});

impl Entity for Person {
    type Id = String;
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A user identifier wrapper, stored as its inner text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UserId(pub String);

inline_shape!(UserId(String));

/// A record holding a set of wrapped values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    /// Identifier.
    pub id: i64,
    /// Users that applied the tag.
    pub labels: BTreeSet<UserId>,
}

structure!(Tagged {
    id: i64,
    labels: BTreeSet<UserId>,
});

impl Entity for Tagged {
    type Id = i64;
    const ID_FIELD: &'static str = "id";

    fn id(&self) -> i64 {
        self.id
    }
}

/// London, near King's Cross.
pub const LONDON: GeoPoint = GeoPoint::new(51.53, -0.10);
/// Oslo city centre.
pub const OSLO: GeoPoint = GeoPoint::new(59.91, 10.75);
/// Paris city centre.
pub const PARIS: GeoPoint = GeoPoint::new(48.86, 2.35);

/// Creates an address.
pub fn address(street: &str, city: &str, zip: Option<&str>) -> Address {
    Address {
        street: street.to_string(),
        city: city.to_string(),
        zip: zip.map(str::to_string),
    }
}

/// Four people with varied data: `p1` Ada (36, London), `p2` Bob (17, Oslo,
/// everything optional empty), `p3` Cy (52, Oslo) and `p4` Dee (29, Paris).
pub fn sample_people() -> Vec<Person> {
    vec![
        Person {
            id: "p1".into(),
            name: "Ada".into(),
            age: 36,
            email: Some("ada@example.com".into()),
            home: Some(address("12 Crescent", "London", Some("N1"))),
            location: LONDON,
            tags: vec!["math".into(), "vip".into()],
            previous: vec![address("3 Mill Lane", "Cambridge", Some("CB2"))],
            scores: BTreeMap::from([("chess".to_string(), 1800)]),
        },
        Person {
            id: "p2".into(),
            name: "Bob".into(),
            age: 17,
            email: None,
            home: None,
            location: OSLO,
            tags: Vec::new(),
            previous: Vec::new(),
            scores: BTreeMap::new(),
        },
        Person {
            id: "p3".into(),
            name: "Cy".into(),
            age: 52,
            email: Some("cy@example.no".into()),
            home: Some(address("Karl Johans gate 1", "Oslo", None)),
            location: GeoPoint::new(59.92, 10.76),
            tags: vec!["vip".into()],
            previous: Vec::new(),
            scores: BTreeMap::from([("go".to_string(), 2)]),
        },
        Person {
            id: "p4".into(),
            name: "Dee".into(),
            age: 29,
            email: Some("dee@example.fr".into()),
            home: Some(address("5 Rue Cler", "Paris", Some("75007"))),
            location: PARIS,
            tags: vec!["art".into()],
            previous: vec![address("12 Crescent", "London", Some("N1"))],
            scores: BTreeMap::from([("chess".to_string(), 1500), ("go".to_string(), 5)]),
        },
    ]
}

/// Installs a test-friendly tracing subscriber once. The filter comes from
/// `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed by another test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
