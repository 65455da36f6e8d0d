use serde_json::Value;

use crate::model::ResourceId;

/// The normalized identity set one event maps to. A single mutation can
/// address two resources at once (a repost and the original behind it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentitySet {
    pub primary: Option<ResourceId>,
    pub related: Vec<ResourceId>,
}

impl IdentitySet {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.related.is_empty()
    }

    /// Primary first, then related.
    pub fn all(&self) -> Vec<ResourceId> {
        let mut ids = Vec::with_capacity(1 + self.related.len());
        if let Some(primary) = &self.primary {
            ids.push(primary.clone());
        }
        ids.extend(self.related.iter().cloned());
        ids
    }
}

/// Where an id may hide inside a payload, in priority order. Different
/// event types embed the affected resource at different nesting depths.
const PROBES: &[&[&str]] = &[
    &["postCode"],
    &["post", "code"],
    &["repostCode"],
    &["repostData", "code"],
    &["originalPostCode"],
    &["post", "originalPost", "code"],
    &["repostData", "originalPost", "code"],
];

/// Normalize an arbitrary payload into its canonical identity set.
/// Unrecognized shapes yield an empty set; the caller drops the event.
pub fn resolve(payload: &Value) -> IdentitySet {
    let mut set = IdentitySet::default();
    for probe in PROBES {
        let Some(code) = string_at(payload, probe) else {
            continue;
        };
        let id = ResourceId::from(code);
        if set.primary.is_none() {
            set.primary = Some(id);
        } else if set.primary.as_ref() != Some(&id) && !set.related.contains(&id) {
            set.related.push(id);
        }
    }
    set
}

/// Ids that refer to the *original* resource behind a repost, used when a
/// repost event carries no explicit count and the original's counter must
/// be derived instead.
pub fn originals(payload: &Value) -> Vec<ResourceId> {
    const ORIGINAL_PROBES: &[&[&str]] = &[
        &["originalPostCode"],
        &["post", "originalPost", "code"],
        &["repostData", "originalPost", "code"],
    ];
    let mut ids = Vec::new();
    for probe in ORIGINAL_PROBES {
        if let Some(code) = string_at(payload, probe) {
            let id = ResourceId::from(code);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn string_at<'v>(value: &'v Value, path: &[&str]) -> Option<&'v str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_code_wins_priority() {
        let set = resolve(&json!({
            "postCode": "P1",
            "post": {"code": "P2"},
        }));
        assert_eq!(set.primary, Some(ResourceId::from("P1")));
        assert_eq!(set.related, vec![ResourceId::from("P2")]);
    }

    #[test]
    fn repost_event_yields_both_identities() {
        let set = resolve(&json!({
            "repostCode": "P9",
            "originalPostCode": "P1",
        }));
        assert_eq!(set.primary, Some(ResourceId::from("P9")));
        assert_eq!(set.related, vec![ResourceId::from("P1")]);
    }

    #[test]
    fn duplicates_collapse() {
        let set = resolve(&json!({
            "postCode": "P1",
            "post": {"code": "P1", "originalPost": {"code": "P1"}},
        }));
        assert_eq!(set.primary, Some(ResourceId::from("P1")));
        assert!(set.related.is_empty());
    }

    #[test]
    fn nested_original_is_collected() {
        let set = resolve(&json!({
            "post": {"code": "P9", "originalPost": {"code": "P1"}},
        }));
        assert_eq!(set.primary, Some(ResourceId::from("P9")));
        assert_eq!(set.related, vec![ResourceId::from("P1")]);
    }

    #[test]
    fn originals_pick_only_original_codes() {
        let ids = originals(&json!({
            "repostCode": "P9",
            "originalPostCode": "P1",
            "post": {"code": "P9", "originalPost": {"code": "P1"}},
        }));
        assert_eq!(ids, vec![ResourceId::from("P1")]);
    }

    #[test]
    fn malformed_payloads_yield_empty_set() {
        assert!(resolve(&json!({"something": "else"})).is_empty());
        assert!(resolve(&json!({"postCode": ""})).is_empty());
        assert!(resolve(&json!(null)).is_empty());
        assert!(resolve(&json!({"postCode": 17})).is_empty());
    }
}
