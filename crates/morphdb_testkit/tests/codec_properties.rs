//! Codec round trips over generated records.

use morphdb_codec::{MapFormat, Shape};
use morphdb_testkit::fixtures::{sample_people, Person, Tagged};
use morphdb_testkit::generators::{person_strategy, scalar_value_strategy, tagged_strategy};
use proptest::prelude::*;

proptest! {
    #[test]
    fn person_roundtrips_in_both_formats(person in person_strategy()) {
        for format in [MapFormat::soa(), MapFormat::native()] {
            let row = format.encode_record(&person).unwrap();
            prop_assert_eq!(format.decode_record::<Person>(&row).unwrap(), person.clone());
        }
    }

    #[test]
    fn inline_sets_roundtrip(tagged in tagged_strategy()) {
        let format = MapFormat::soa();
        let row = format.encode_record(&tagged).unwrap();
        prop_assert_eq!(format.decode_record::<Tagged>(&row).unwrap(), tagged);
    }

    #[test]
    fn value_order_is_total(a in scalar_value_strategy(), b in scalar_value_strategy()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        prop_assert!(a.compare(&a).is_eq());
    }
}

#[test]
fn soa_columns_cover_every_leaf() {
    let format = MapFormat::soa();
    let person = &sample_people()[0];
    let row = format.encode_record(person).unwrap();
    for column in [
        "id",
        "home__exists",
        "home__city",
        "location__latitude",
        "tags",
        "previous__street",
        "previous__zip",
        "scores",
        "scores__value",
    ] {
        assert!(row.contains(column), "missing {column}");
    }
    let plan = format.column_plan(&morphdb_codec::descriptor_of::<Person>());
    assert!(row.columns().all(|column| plan.get(column).is_some()));
}

#[test]
fn sample_people_roundtrip_through_values() {
    for person in sample_people() {
        assert_eq!(Person::from_value(person.to_value()).unwrap(), person);
    }
}
