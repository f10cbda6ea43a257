//! Names of the backing collections.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A collection (table) in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tickets,
    Profiles,
    Messages,
    Machines,
    ActivityLogs,
    Warehouses,
    SectorGroups,
    JobRoles,
}

impl Collection {
    /// Every collection fetched by a full refresh.
    pub const ALL: [Collection; 8] = [
        Collection::Tickets,
        Collection::Profiles,
        Collection::Messages,
        Collection::Machines,
        Collection::ActivityLogs,
        Collection::Warehouses,
        Collection::SectorGroups,
        Collection::JobRoles,
    ];

    /// Table name used by the backend.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Tickets => "tickets",
            Collection::Profiles => "profiles",
            Collection::Messages => "messages",
            Collection::Machines => "machines",
            Collection::ActivityLogs => "activity_logs",
            Collection::Warehouses => "warehouses",
            Collection::SectorGroups => "sector_groups",
            Collection::JobRoles => "job_roles",
        }
    }

    /// Parse a table name.
    pub fn from_table_name(name: &str) -> Option<Self> {
        Collection::ALL
            .into_iter()
            .find(|c| c.table_name() == name)
    }

    /// Human-readable (Portuguese) label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Collection::Tickets => "chamados",
            Collection::Profiles => "perfis",
            Collection::Messages => "mensagens",
            Collection::Machines => "máquinas",
            Collection::ActivityLogs => "atividades",
            Collection::Warehouses => "galpões",
            Collection::SectorGroups => "grupos",
            Collection::JobRoles => "funções",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
