use std::collections::{BTreeMap, BTreeSet};

use overlay::{Evaluation, HasPrimitives, HasProperties, Mixin, PropertyConstructor, Runtime};
use proptest::prelude::*;

/// A mixin keyed `name` with one property per entry of `properties`, each
/// contributing the scalar `tag`.
fn mixin(name: &str, properties: &BTreeSet<String>, tag: i64) -> Mixin {
    let mut builder = Mixin::builder(name).primitive(tag);
    for property in properties {
        let key = format!("{name}#{property}");
        builder = builder.property(
            property.as_str(),
            PropertyConstructor::new(move |_| Ok(vec![Mixin::scalar(key.as_str(), tag)])),
        );
    }
    builder.build()
}

/// Leaf mixin keys, and for each property the sorted scalars merged into it.
fn shape(evaluation: Evaluation<'_>) -> (BTreeSet<String>, BTreeMap<String, Vec<i64>>) {
    let keys = evaluation
        .all_mixins()
        .iter()
        .map(|mixin| mixin.key().to_string())
        .filter(|key| !key.starts_with("group"))
        .collect();
    let properties = evaluation
        .all_properties()
        .unwrap()
        .into_iter()
        .map(|(name, property)| {
            let mut values: Vec<i64> = property
                .all_primitives()
                .iter()
                .filter_map(|primitive| primitive.as_int())
                .collect();
            values.sort_unstable();
            (name.to_string(), values)
        })
        .collect();
    (keys, properties)
}

fn names() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-e]", 0..4)
}

proptest! {
    #[test]
    fn composition_ignores_order(a in names(), b in names(), c in names(), order in 0usize..6) {
        let (ma, mb, mc) = (mixin("A", &a, 1), mixin("B", &b, 2), mixin("C", &c, 3));
        let orders = [
            [&ma, &mb, &mc],
            [&ma, &mc, &mb],
            [&mb, &ma, &mc],
            [&mb, &mc, &ma],
            [&mc, &ma, &mb],
            [&mc, &mb, &ma],
        ];

        let runtime = Runtime::new();
        let reference = shape(runtime.evaluate(vec![ma.clone(), mb.clone(), mc.clone()]));
        let permuted = shape(runtime.evaluate(orders[order].iter().map(|mixin| (*mixin).clone()).collect()));
        prop_assert_eq!(reference, permuted);
    }

    #[test]
    fn composition_ignores_grouping(a in names(), b in names(), c in names()) {
        let (ma, mb, mc) = (mixin("A", &a, 1), mixin("B", &b, 2), mixin("C", &c, 3));
        let runtime = Runtime::new();

        let left = Mixin::builder("group-left").inherit([ma.clone(), mb.clone()]).build();
        let right = Mixin::builder("group-right").inherit([mb.clone(), mc.clone()]).build();

        let flat = shape(runtime.evaluate(vec![ma.clone(), mb.clone(), mc.clone()]));
        let left_grouped = shape(runtime.evaluate(vec![left, mc]));
        let right_grouped = shape(runtime.evaluate(vec![ma, right]));
        prop_assert_eq!(&flat, &left_grouped);
        prop_assert_eq!(&flat, &right_grouped);
    }

    #[test]
    fn shared_ancestor_is_counted_once(a in names(), b in names()) {
        let base = mixin("A", &a, 1);
        let left = Mixin::builder("B").inherit([base.clone()]).build();
        let right = Mixin::builder("C").inherit([base]).build();
        let top = Mixin::builder("D").inherit([left, right, mixin("E", &b, 2)]).build();

        let runtime = Runtime::new();
        let evaluation = runtime.evaluate(vec![top]);
        let keys: Vec<String> = evaluation.all_mixins().iter().map(|mixin| mixin.key().to_string()).collect();
        prop_assert_eq!(keys.iter().filter(|key| key.as_str() == "A").count(), 1);
        prop_assert_eq!(evaluation.all_primitives().iter().filter(|primitive| primitive.as_int() == Some(1)).count(), 1);
    }
}
