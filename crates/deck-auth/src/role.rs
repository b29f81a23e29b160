//! Role names and role sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of an anonymous session.
pub const GUEST: &str = "guest";
/// Default role of a registered account.
pub const USER: &str = "user";
/// Role required by administrative operations.
pub const ADMIN: &str = "admin";

/// A set of role names.
///
/// Authorization is ANY-of: a caller satisfies a requirement by holding
/// at least one of the required roles. Stored as a comma-joined string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The anonymous role set, `{"guest"}`.
    pub fn guest() -> Self {
        Self::of([GUEST])
    }

    /// The admin requirement, `{"admin"}`.
    pub fn admin() -> Self {
        Self::of([ADMIN])
    }

    /// Build from role names. Blank names are dropped, others trimmed.
    pub fn of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            roles
                .into_iter()
                .map(|r| r.as_ref().trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        )
    }

    /// Parse the stored comma-joined form.
    pub fn parse(joined: &str) -> Self {
        Self::of(joined.split(','))
    }

    /// Comma-joined form for storage.
    pub fn joined(&self) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    }

    /// Whether `role` is in the set.
    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }

    /// Whether this set shares at least one role with `required`.
    pub fn satisfies(&self, required: &RoleSet) -> bool {
        !self.0.is_disjoint(&required.0)
    }

    /// Whether the set holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.contains(ADMIN)
    }

    /// Add a role.
    pub fn insert(&mut self, role: impl Into<String>) -> bool {
        self.0.insert(role.into())
    }

    /// Number of roles.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate role names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Sorted role names.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl<S: AsRef<str>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::of(iter)
    }
}
