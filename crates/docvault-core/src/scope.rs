//! Access scope resolution.
//!
//! Computes the set of document ids a principal may see:
//!
//! 1. **Base visibility** by role. Admin sees everything; Manager sees
//!    documents owned by self or by direct reports (one level only);
//!    Analyst and Viewer see their own documents.
//! 2. **Classification gate** ([`can_access`]), applied after base
//!    visibility. Admin bypasses it.
//! 3. **Explicit selection.** A non-empty selection intersects the result.
//!    An empty selection is the same as no selection: no extra restriction.
//!
//! The resolver is pure. Callers load the [`AccessGraph`] from storage per
//! request.

use std::collections::{HashMap, HashSet};

use crate::error::VaultError;
use crate::models::{Classification, DocumentAccess, Principal, Role};

/// Highest classification a role may read. `None` means the gate is
/// bypassed entirely.
pub fn classification_ceiling(role: Role) -> Option<Classification> {
    match role {
        Role::Viewer => Some(Classification::Public),
        Role::Analyst => Some(Classification::Internal),
        Role::Manager => Some(Classification::Restricted),
        Role::Admin => None,
    }
}

/// Classification gate. Monotonic in role rank.
pub fn can_access(role: Role, classification: Classification) -> bool {
    match classification_ceiling(role) {
        None => true,
        Some(ceiling) => classification <= ceiling,
    }
}

/// Documents plus the reporting edges needed to scope them.
#[derive(Debug, Clone, Default)]
pub struct AccessGraph {
    pub documents: Vec<DocumentAccess>,
    /// manager id → ids of direct reports.
    pub direct_reports: HashMap<String, Vec<String>>,
}

impl AccessGraph {
    pub fn new(documents: Vec<DocumentAccess>) -> Self {
        Self {
            documents,
            direct_reports: HashMap::new(),
        }
    }

    pub fn with_reports(mut self, manager_id: &str, reports: Vec<String>) -> Self {
        self.direct_reports.insert(manager_id.to_string(), reports);
        self
    }

    pub fn document(&self, id: &str) -> Option<&DocumentAccess> {
        self.documents.iter().find(|d| d.id == id)
    }
}

/// Per-request scope input.
#[derive(Debug, Clone, Copy)]
pub struct ScopeQuery<'a> {
    pub principal: &'a Principal,
    pub explicit_selection: Option<&'a [String]>,
}

impl<'a> ScopeQuery<'a> {
    pub fn new(principal: &'a Principal) -> Self {
        Self {
            principal,
            explicit_selection: None,
        }
    }

    pub fn with_selection(mut self, selection: &'a [String]) -> Self {
        self.explicit_selection = Some(selection);
        self
    }
}

/// Resolve the set of document ids visible to the query's principal.
///
/// Errors only on a malformed selection (blank ids).
pub fn resolve(graph: &AccessGraph, query: &ScopeQuery<'_>) -> Result<HashSet<String>, VaultError> {
    let selection = validate_selection(query.explicit_selection)?;
    let principal = query.principal;

    let owners: HashSet<&str> = match principal.role {
        Role::Admin => HashSet::new(),
        Role::Manager => {
            let mut set: HashSet<&str> = HashSet::from([principal.id.as_str()]);
            if let Some(reports) = graph.direct_reports.get(&principal.id) {
                set.extend(reports.iter().map(String::as_str));
            }
            set
        }
        Role::Analyst | Role::Viewer => HashSet::from([principal.id.as_str()]),
    };

    let visible = graph
        .documents
        .iter()
        .filter(|d| principal.role == Role::Admin || owners.contains(d.owner_id.as_str()))
        .filter(|d| can_access(principal.role, d.classification))
        .filter(|d| selection.as_ref().map_or(true, |sel| sel.contains(d.id.as_str())))
        .map(|d| d.id.clone())
        .collect();

    Ok(visible)
}

/// `None` and `Some([])` both mean "no restriction".
fn validate_selection(selection: Option<&[String]>) -> Result<Option<HashSet<&str>>, VaultError> {
    match selection {
        None => Ok(None),
        Some([]) => Ok(None),
        Some(ids) => {
            if let Some(bad) = ids.iter().position(|id| id.trim().is_empty()) {
                return Err(VaultError::InvalidSelection(format!(
                    "document id at position {} is blank",
                    bad
                )));
            }
            Ok(Some(ids.iter().map(String::as_str).collect()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MimeClass;

    fn access(id: &str, owner: &str, classification: Classification) -> DocumentAccess {
        DocumentAccess {
            id: id.to_string(),
            owner_id: owner.to_string(),
            classification,
            title: id.to_string(),
            mime_class: MimeClass::Text,
            updated_at: 0,
        }
    }

    fn principal(id: &str, role: Role) -> Principal {
        Principal {
            id: id.to_string(),
            role,
            manager_id: None,
        }
    }

    fn graph() -> AccessGraph {
        AccessGraph::new(vec![
            access("m-pub", "mia", Classification::Public),
            access("m-res", "mia", Classification::Restricted),
            access("a-int", "ann", Classification::Internal),
            access("a-top", "ann", Classification::TopSecret),
            access("b-pub", "bob", Classification::Public),
            access("z-int", "zed", Classification::Internal),
        ])
        .with_reports("mia", vec!["ann".into()])
        .with_reports("ann", vec!["bob".into()])
    }

    fn ids(set: &HashSet<String>) -> Vec<&str> {
        let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
        v.sort();
        v
    }

    #[test]
    fn admin_sees_everything() {
        let g = graph();
        let admin = principal("root", Role::Admin);
        assert_eq!(resolve(&g, &ScopeQuery::new(&admin)).unwrap().len(), 6);
    }

    #[test]
    fn manager_sees_self_and_direct_reports_only() {
        let g = graph();
        let mia = principal("mia", Role::Manager);
        let got = resolve(&g, &ScopeQuery::new(&mia)).unwrap();
        // bob reports to ann, not to mia: one level only. a-top is above the ceiling.
        assert_eq!(ids(&got), vec!["a-int", "m-pub", "m-res"]);
    }

    #[test]
    fn analyst_sees_own_documents_under_ceiling() {
        let g = graph();
        let ann = principal("ann", Role::Analyst);
        assert_eq!(ids(&resolve(&g, &ScopeQuery::new(&ann)).unwrap()), vec!["a-int"]);
    }

    #[test]
    fn viewer_limited_to_public() {
        let g = graph();
        let mia = principal("mia", Role::Viewer);
        assert_eq!(ids(&resolve(&g, &ScopeQuery::new(&mia)).unwrap()), vec!["m-pub"]);
    }

    #[test]
    fn gate_is_monotonic_in_rank() {
        let roles = [Role::Viewer, Role::Analyst, Role::Manager, Role::Admin];
        let classes = [
            Classification::Public,
            Classification::Internal,
            Classification::Restricted,
            Classification::TopSecret,
        ];
        for c in classes {
            for pair in roles.windows(2) {
                if can_access(pair[0], c) {
                    assert!(can_access(pair[1], c), "{:?} lost {:?}", pair[1], c);
                }
            }
        }
    }

    #[test]
    fn resolve_is_monotonic_across_roles() {
        let g = graph();
        for id in ["mia", "ann", "bob", "zed"] {
            let at = |role| resolve(&g, &ScopeQuery::new(&principal(id, role))).unwrap();
            let (admin, manager, analyst, viewer) =
                (at(Role::Admin), at(Role::Manager), at(Role::Analyst), at(Role::Viewer));
            assert!(admin.is_superset(&manager), "{}", id);
            assert!(manager.is_superset(&analyst), "{}", id);
            assert!(analyst.is_superset(&viewer), "{}", id);
        }
    }

    #[test]
    fn empty_selection_equals_no_selection() {
        let g = graph();
        let mia = principal("mia", Role::Manager);
        let empty: Vec<String> = Vec::new();
        let none = resolve(&g, &ScopeQuery::new(&mia)).unwrap();
        let with_empty = resolve(&g, &ScopeQuery::new(&mia).with_selection(&empty)).unwrap();
        assert_eq!(none, with_empty);
        assert!(!with_empty.is_empty());
    }

    #[test]
    fn non_empty_selection_intersects() {
        let g = graph();
        let mia = principal("mia", Role::Manager);
        // z-int is outside mia's scope and must not leak back in.
        let sel = vec!["m-pub".to_string(), "z-int".to_string()];
        let got = resolve(&g, &ScopeQuery::new(&mia).with_selection(&sel)).unwrap();
        assert_eq!(ids(&got), vec!["m-pub"]);
    }

    #[test]
    fn blank_selection_id_is_rejected() {
        let g = graph();
        let mia = principal("mia", Role::Manager);
        let sel = vec!["m-pub".to_string(), "  ".to_string()];
        let err = resolve(&g, &ScopeQuery::new(&mia).with_selection(&sel)).unwrap_err();
        assert!(matches!(err, VaultError::InvalidSelection(_)));
    }
}
