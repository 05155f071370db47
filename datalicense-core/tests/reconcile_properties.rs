//! Property tests for schema reconciliation.

use datalicense_core::transform::{ColumnSource, SchemaReconciler};
use proptest::prelude::*;

/// Requested fields: unique names, some tagged as placeholders.
fn field_list() -> impl Strategy<Value = Vec<(String, bool)>> {
    prop::collection::btree_set("[A-Z]{2,6}", 1..8).prop_flat_map(|names| {
        let n = names.len();
        (
            Just(names.into_iter().collect::<Vec<_>>()),
            prop::collection::vec(any::<bool>(), n),
        )
            .prop_map(|(names, tags)| names.into_iter().zip(tags).collect::<Vec<(String, bool)>>())
    })
}

fn mnemonics(fields: &[(String, bool)]) -> Vec<String> {
    fields
        .iter()
        .map(|(name, tagged)| if *tagged { format!("@@{name}") } else { name.clone() })
        .collect()
}

fn delivered(leading: usize, fields: &[(String, bool)]) -> Vec<String> {
    (0..leading)
        .map(|i| format!("sys_{i}"))
        .chain(fields.iter().filter(|(_, t)| !t).map(|(n, _)| n.clone()))
        .collect()
}

fn names(plan: &[ColumnSource]) -> Vec<String> {
    plan.iter().map(|c| c.name().to_string()).collect()
}

proptest! {
    #[test]
    fn output_is_leading_columns_then_full_field_list(
        fields in field_list(),
        leading in 0usize..4,
    ) {
        let r = SchemaReconciler::from_mnemonics(&mnemonics(&fields));
        let plan = r.plan(&delivered(leading, &fields)).unwrap();

        let out = names(&plan);
        prop_assert_eq!(out.len(), leading + fields.len());
        let tail: Vec<String> = fields.iter().map(|(n, _)| n.clone()).collect();
        prop_assert_eq!(&out[leading..], &tail[..]);

        let placeholders = plan.iter().filter(|c| matches!(c, ColumnSource::Placeholder(_))).count();
        prop_assert_eq!(placeholders, fields.iter().filter(|(_, t)| *t).count());
    }

    #[test]
    fn reconciling_twice_is_a_no_op(
        fields in field_list(),
        leading in 0usize..4,
    ) {
        let r = SchemaReconciler::from_mnemonics(&mnemonics(&fields));
        let once = names(&r.plan(&delivered(leading, &fields)).unwrap());
        let twice = r.plan(&once).unwrap();

        prop_assert!(twice.iter().all(|c| matches!(c, ColumnSource::Delivered(_))));
        prop_assert_eq!(names(&twice), once);
    }
}
