//! Condiscon attribute-policy structures
//!
//! A condiscon is a CONjunction of DISjunctions of CONjunctions over IRMA
//! attribute identifiers. The outer list must be satisfied entirely, each
//! inner disjunction by at least one of its conjunctions, and a conjunction
//! by disclosing every attribute it names. On the wire it is a plain JSON
//! array of arrays of arrays of strings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of dot-separated segments in a full IRMA attribute identifier,
/// e.g. `irma-demo.gemeente.personalData.fullname`.
pub const ATTRIBUTE_SEGMENTS: usize = 4;

/// A conjunction of disjunctions of conjunctions of attribute identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condiscon(pub Vec<Vec<Vec<String>>>);

impl Condiscon {
    /// Parse a condiscon from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to the JSON wire form.
    ///
    /// The structure is plain nested vectors of strings, which never fail
    /// to serialize.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Check every attribute identifier for the four-segment form.
    pub fn validate(&self) -> Result<(), InvalidAttributeId> {
        for attribute in self.attribute_ids() {
            validate_attribute_id(&attribute)?;
        }
        Ok(())
    }

    /// Build a condiscon from attributes grouped per credential.
    ///
    /// Each credential becomes one disjunction with a single conjunction
    /// holding all attributes requested from that credential. Iteration
    /// order of the map fixes the serialized order.
    #[must_use]
    pub fn from_grouped(groups: &BTreeMap<String, BTreeSet<String>>) -> Self {
        Condiscon(
            groups
                .values()
                .map(|attributes| vec![attributes.iter().cloned().collect()])
                .collect(),
        )
    }

    /// Whether a set of disclosed attribute identifiers satisfies this
    /// policy. Matching is on presence only; raw values are not inspected.
    #[must_use]
    pub fn is_fulfilled_by(&self, disclosed: &BTreeSet<String>) -> bool {
        self.0.iter().all(|discon| {
            discon
                .iter()
                .any(|con| con.iter().all(|attribute| disclosed.contains(attribute)))
        })
    }

    /// All attribute identifiers mentioned anywhere in the policy.
    #[must_use]
    pub fn attribute_ids(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .flatten()
            .flatten()
            .cloned()
            .collect()
    }
}

/// An attribute identifier that does not have the required segment count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAttributeId(pub String);

impl fmt::Display for InvalidAttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attribute identifier '{}' does not have {} dot-separated segments",
            self.0, ATTRIBUTE_SEGMENTS
        )
    }
}

impl std::error::Error for InvalidAttributeId {}

/// Validate a full attribute identifier: exactly four non-empty
/// dot-separated segments.
pub fn validate_attribute_id(id: &str) -> Result<(), InvalidAttributeId> {
    let segments: Vec<&str> = id.split('.').collect();
    if segments.len() != ATTRIBUTE_SEGMENTS || segments.iter().any(|s| s.is_empty()) {
        return Err(InvalidAttributeId(id.to_string()));
    }
    Ok(())
}

/// The credential prefix of a full attribute identifier: its first three
/// segments.
#[must_use]
pub fn credential_of(attribute_id: &str) -> String {
    attribute_id
        .split('.')
        .take(ATTRIBUTE_SEGMENTS - 1)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_and_serialize() {
        let json = r#"[[["irma-demo.gemeente.personalData.fullname"]]]"#;
        let condiscon = Condiscon::from_json(json).unwrap();
        assert_eq!(condiscon.to_json(), json);
    }

    #[test]
    fn test_validate_rejects_short_id() {
        let condiscon = Condiscon(vec![vec![vec!["pbdf.gemeente.fullname".into()]]]);
        assert!(condiscon.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_segment() {
        assert!(validate_attribute_id("irma-demo..personalData.fullname").is_err());
        assert!(validate_attribute_id("irma-demo.gemeente.personalData.fullname").is_ok());
    }

    #[test]
    fn test_from_grouped_orders_by_credential() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "pbdf.sidn-pbdf.email".to_string(),
            set(&["pbdf.sidn-pbdf.email.email"]),
        );
        groups.insert(
            "irma-demo.gemeente.personalData".to_string(),
            set(&[
                "irma-demo.gemeente.personalData.fullname",
                "irma-demo.gemeente.personalData.bsn",
            ]),
        );
        let condiscon = Condiscon::from_grouped(&groups);
        assert_eq!(
            condiscon.to_json(),
            r#"[[["irma-demo.gemeente.personalData.bsn","irma-demo.gemeente.personalData.fullname"]],[["pbdf.sidn-pbdf.email.email"]]]"#
        );
    }

    #[test]
    fn test_fulfillment_requires_every_discon() {
        let condiscon = Condiscon(vec![
            vec![vec!["a.b.c.d".into()]],
            vec![vec!["e.f.g.h".into()]],
        ]);
        assert!(condiscon.is_fulfilled_by(&set(&["a.b.c.d", "e.f.g.h"])));
        assert!(!condiscon.is_fulfilled_by(&set(&["a.b.c.d"])));
    }

    #[test]
    fn test_fulfillment_any_con_suffices() {
        let condiscon = Condiscon(vec![vec![
            vec!["a.b.c.d".into(), "a.b.c.e".into()],
            vec!["x.y.z.w".into()],
        ]]);
        assert!(condiscon.is_fulfilled_by(&set(&["x.y.z.w"])));
        assert!(condiscon.is_fulfilled_by(&set(&["a.b.c.d", "a.b.c.e"])));
        assert!(!condiscon.is_fulfilled_by(&set(&["a.b.c.d"])));
    }

    #[test]
    fn test_empty_condiscon_is_trivially_fulfilled() {
        let condiscon = Condiscon(vec![]);
        assert!(condiscon.is_fulfilled_by(&BTreeSet::new()));
    }

    #[test]
    fn test_credential_prefix() {
        assert_eq!(
            credential_of("irma-demo.gemeente.personalData.fullname"),
            "irma-demo.gemeente.personalData"
        );
    }
}
