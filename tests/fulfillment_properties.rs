//! Property tests for condiscon fulfillment.
//!
//! Identifiers are generated so that every inner conjunction owns its own
//! attributes; this makes the expected outcome of adding or removing a
//! group's attributes exactly computable.

use irma_saml_bridge::saml::Condiscon;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// A condiscon whose attribute ids encode their own position, so no id
/// appears in more than one conjunction.
fn arb_condiscon() -> impl Strategy<Value = Condiscon> {
    let shape = prop::collection::vec(
        prop::collection::vec(1usize..=3, 1..=3),
        1..=3,
    );
    shape.prop_map(|discons| {
        Condiscon(
            discons
                .into_iter()
                .enumerate()
                .map(|(d, cons)| {
                    cons.into_iter()
                        .enumerate()
                        .map(|(c, len)| {
                            (0..len)
                                .map(|a| format!("cred{d}-{c}.issuer.credential.attr{a}"))
                                .collect()
                        })
                        .collect()
                })
                .collect(),
        )
    })
}

/// Pick one conjunction per group and collect its attributes.
fn choose(condiscon: &Condiscon, picks: &[usize]) -> BTreeSet<String> {
    condiscon
        .0
        .iter()
        .zip(picks)
        .flat_map(|(discon, pick)| discon[pick % discon.len()].iter().cloned())
        .collect()
}

proptest! {
    /// Disclosing exactly one conjunction per group always fulfills.
    #[test]
    fn prop_one_conjunction_per_group_fulfills(
        condiscon in arb_condiscon(),
        picks in prop::collection::vec(0usize..10, 3),
    ) {
        let disclosed = choose(&condiscon, &picks);
        prop_assert!(condiscon.is_fulfilled_by(&disclosed));
    }

    /// Extra unrelated attributes never break fulfillment.
    #[test]
    fn prop_extra_attributes_are_harmless(
        condiscon in arb_condiscon(),
        picks in prop::collection::vec(0usize..10, 3),
        extra in prop::collection::btree_set("[a-z]{3}\\.x\\.y\\.z", 0..4),
    ) {
        let mut disclosed = choose(&condiscon, &picks);
        disclosed.extend(extra);
        prop_assert!(condiscon.is_fulfilled_by(&disclosed));
    }

    /// Dropping every attribute of one group breaks fulfillment, since
    /// ids never repeat across conjunctions.
    #[test]
    fn prop_missing_group_breaks_fulfillment(
        condiscon in arb_condiscon(),
        picks in prop::collection::vec(0usize..10, 3),
        victim in 0usize..10,
    ) {
        let victim = victim % condiscon.0.len();
        let victim_attrs: BTreeSet<String> = condiscon.0[victim]
            .iter()
            .flatten()
            .cloned()
            .collect();
        let disclosed: BTreeSet<String> = choose(&condiscon, &picks)
            .into_iter()
            .filter(|id| !victim_attrs.contains(id))
            .collect();
        prop_assert!(!condiscon.is_fulfilled_by(&disclosed));
    }

    /// Removing a single attribute from a single-conjunction group breaks
    /// fulfillment.
    #[test]
    fn prop_partial_conjunction_does_not_fulfill(
        condiscon in arb_condiscon(),
        picks in prop::collection::vec(0usize..10, 3),
    ) {
        // Narrow the first group to the picked conjunction only, so no
        // alternative can stand in.
        let mut condiscon = condiscon;
        let pick = picks[0] % condiscon.0[0].len();
        condiscon.0[0] = vec![condiscon.0[0][pick].clone()];

        let mut disclosed = choose(&condiscon, &picks);
        let removed = condiscon.0[0][0][0].clone();
        disclosed.remove(&removed);
        prop_assert!(!condiscon.is_fulfilled_by(&disclosed));
    }
}

#[test]
fn test_empty_condiscon_is_vacuously_fulfilled() {
    let condiscon = Condiscon(vec![]);
    assert!(condiscon.is_fulfilled_by(&BTreeSet::new()));
}
