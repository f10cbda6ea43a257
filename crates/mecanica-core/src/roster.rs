//! Roster lookups and role-name resolution.

use std::collections::HashMap;

use crate::models::{Identity, JobRole};

/// Resolve an identity's role name through the job-role join.
///
/// When the identity references a known job role, that role's name wins over
/// whatever the raw role column said.
pub fn resolve_role(identity: &mut Identity, job_roles: &[JobRole]) {
    if let Some(job_role_id) = identity.job_role_id.as_deref() {
        if let Some(role) = job_roles.iter().find(|r| r.id == job_role_id) {
            if !role.name.is_empty() {
                identity.role = role.name.clone();
            }
        }
    }
}

/// Resolve role names for a whole roster.
pub fn resolve_roles(users: &mut [Identity], job_roles: &[JobRole]) {
    for user in users.iter_mut() {
        resolve_role(user, job_roles);
    }
}

/// Read-only index over the known identities.
#[derive(Debug, Default)]
pub struct Roster<'a> {
    by_id: HashMap<&'a str, &'a Identity>,
}

impl<'a> Roster<'a> {
    pub fn new(users: &'a [Identity]) -> Self {
        Self {
            by_id: users.iter().map(|u| (u.id.as_str(), u)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&'a Identity> {
        self.by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn name_of(&self, id: &str) -> Option<&'a str> {
        self.get(id).map(|u| u.name.as_str())
    }

    pub fn role_of(&self, id: &str) -> Option<&'a str> {
        self.get(id).map(|u| u.role.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
