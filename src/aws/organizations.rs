//! AWS Organizations: roots, organizational units and member accounts
//!
//! A global service served from `us-east-1`.

use super::client::{AwsClient, HOME_REGION};
use super::credentials::AwsCredentials;
use crate::inventory::model::Scope;
use anyhow::Result;
use serde_json::{json, Value};

const SERVICE: &str = "organizations";
const TARGET_PREFIX: &str = "AWSOrganizationsV20161128";

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl From<&Value> for Account {
    fn from(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();
        Self {
            id: field("Id"),
            name: field("Name"),
            status: field("Status"),
        }
    }
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }

    pub fn to_scope(&self) -> Scope {
        Scope::terminal(&self.id).with_name(&self.name)
    }
}

fn named(value: &Value) -> Option<(String, String)> {
    let id = value.get("Id").and_then(|v| v.as_str())?;
    let name = value.get("Name").and_then(|v| v.as_str()).unwrap_or("");
    Some((id.to_string(), name.to_string()))
}

async fn list(
    client: &AwsClient,
    creds: &AwsCredentials,
    action: &str,
    body: Value,
    items_key: &str,
) -> Result<Vec<Value>> {
    client
        .json_all(
            creds,
            SERVICE,
            HOME_REGION,
            &format!("{}.{}", TARGET_PREFIX, action),
            body,
            items_key,
            "NextToken",
        )
        .await
}

/// Organization roots, as organization scopes
pub async fn list_roots(client: &AwsClient, creds: &AwsCredentials) -> Result<Vec<Scope>> {
    let roots = list(client, creds, "ListRoots", json!({}), "Roots").await?;
    Ok(roots
        .iter()
        .filter_map(named)
        .map(|(id, name)| Scope::organization(id).with_name(name))
        .collect())
}

/// Direct child OUs of a root or OU
pub async fn list_organizational_units(client: &AwsClient, creds: &AwsCredentials, parent_id: &str) -> Result<Vec<Scope>> {
    let units = list(
        client,
        creds,
        "ListOrganizationalUnitsForParent",
        json!({ "ParentId": parent_id }),
        "OrganizationalUnits",
    )
    .await?;
    Ok(units
        .iter()
        .filter_map(named)
        .map(|(id, name)| Scope::folder(id).with_name(name))
        .collect())
}

/// Active accounts directly under a root or OU
pub async fn list_accounts_for_parent(client: &AwsClient, creds: &AwsCredentials, parent_id: &str) -> Result<Vec<Account>> {
    let accounts = list(
        client,
        creds,
        "ListAccountsForParent",
        json!({ "ParentId": parent_id }),
        "Accounts",
    )
    .await?;
    Ok(accounts.iter().map(Account::from).filter(Account::is_active).collect())
}

/// Every active account in the organization
pub async fn list_accounts(client: &AwsClient, creds: &AwsCredentials) -> Result<Vec<Account>> {
    let accounts = list(client, creds, "ListAccounts", json!({}), "Accounts").await?;
    Ok(accounts.iter().map(Account::from).filter(Account::is_active).collect())
}
