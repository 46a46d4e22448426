use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A task as returned by the list endpoint.
///
/// Only the identifier and name are interpreted; everything else is kept
/// verbatim for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `GET /list/{id}/task`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPage {
    #[serde(default, alias = "tasks")]
    pub items: Vec<Task>,
    #[serde(default)]
    pub is_last_page: bool,
}

/// Optional filters for list requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFlags {
    pub include_closed: bool,
    pub subtasks: bool,
}

impl ListFlags {
    pub(crate) fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut query = vec![("page", page.to_string())];
        if self.include_closed {
            query.push(("include_closed", "true".to_string()));
        }
        if self.subtasks {
            query.push(("subtasks", "true".to_string()));
        }
        query
    }
}
