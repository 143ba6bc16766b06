//! GCP Projects
//!
//! Project and folder listing through Cloud Resource Manager. The v1 API
//! gives the flat list of every visible project; v3 walks the hierarchy
//! one parent at a time.

use super::client::GcpClient;
use crate::inventory::model::{Scope, ScopeKind};
use anyhow::Result;
use serde_json::Value;

/// Project information
#[derive(Debug, Clone)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub lifecycle_state: String,
}

impl From<&Value> for Project {
    fn from(value: &Value) -> Self {
        // v1 uses name/lifecycleState, v3 uses displayName/state
        Self {
            project_id: value
                .get("projectId")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            name: value
                .get("displayName")
                .or_else(|| value.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            lifecycle_state: value
                .get("lifecycleState")
                .or_else(|| value.get("state"))
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
        }
    }
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == "ACTIVE"
    }

    pub fn to_scope(&self) -> Scope {
        Scope::terminal(&self.project_id).with_name(&self.name)
    }
}

/// Folder information
#[derive(Debug, Clone)]
pub struct Folder {
    /// Numeric id, without the `folders/` prefix
    pub id: String,
    pub display_name: String,
    pub state: String,
}

impl From<&Value> for Folder {
    fn from(value: &Value) -> Self {
        let name = value.get("name").and_then(|v| v.as_str()).unwrap_or("");
        Self {
            id: name.trim_start_matches("folders/").to_string(),
            display_name: value
                .get("displayName")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            state: value
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
        }
    }
}

/// Resource Manager parent name for a scope
pub fn parent_name(scope: &Scope) -> String {
    match scope.kind {
        ScopeKind::Organization => format!("organizations/{}", scope.id),
        ScopeKind::Folder => format!("folders/{}", scope.id),
        ScopeKind::Terminal => format!("projects/{}", scope.id),
    }
}

/// List all accessible active GCP projects
pub async fn list_projects(client: &GcpClient) -> Result<Vec<Project>> {
    let url = client.resourcemanager_url("projects");
    let projects = client.get_all(&url, "projects").await?;

    Ok(projects
        .iter()
        .map(Project::from)
        .filter(Project::is_active)
        .collect())
}

/// List active projects directly under an organization or folder
pub async fn list_child_projects(client: &GcpClient, parent: &str) -> Result<Vec<Project>> {
    let url = format!(
        "{}?parent={}",
        client.resourcemanager_v3_url("projects"),
        urlencoding::encode(parent)
    );
    let projects = client.get_all(&url, "projects").await?;

    Ok(projects
        .iter()
        .map(Project::from)
        .filter(Project::is_active)
        .collect())
}

/// List active folders directly under an organization or folder
pub async fn list_child_folders(client: &GcpClient, parent: &str) -> Result<Vec<Folder>> {
    let url = format!(
        "{}?parent={}",
        client.resourcemanager_v3_url("folders"),
        urlencoding::encode(parent)
    );
    let folders = client.get_all(&url, "folders").await?;

    Ok(folders
        .iter()
        .map(Folder::from)
        .filter(|f| f.state == "ACTIVE" && !f.id.is_empty())
        .collect())
}
