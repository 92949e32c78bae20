//! Benchmark utilities.

use morphdb_core::Condition;
use morphdb_testkit::generators::{person_condition_strategy, person_strategy};
use morphdb_testkit::Person;
use proptest::strategy::{Strategy, ValueTree};
use proptest::test_runner::TestRunner;

fn sample<S: Strategy>(strategy: S, count: usize) -> Vec<S::Value> {
    let mut runner = TestRunner::deterministic();
    (0..count)
        .filter_map(|_| strategy.new_tree(&mut runner).ok())
        .map(|tree| tree.current())
        .collect()
}

/// Generates `count` people, the same ones on every run.
pub fn generate_people(count: usize) -> Vec<Person> {
    sample(person_strategy(), count)
}

/// Generates `count` well-typed conditions over [`Person`], the same ones
/// on every run.
pub fn generate_conditions(count: usize) -> Vec<Condition> {
    sample(person_condition_strategy(), count)
}
