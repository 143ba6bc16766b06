//! Management groups and subscriptions

use super::client::AzureClient;
use crate::inventory::model::Scope;
use anyhow::Result;
use serde_json::Value;

const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
const MANAGEMENT_GROUPS_API_VERSION: &str = "2021-04-01";

const GROUP_TYPE: &str = "Microsoft.Management/managementGroups";
const SUBSCRIPTION_TYPE: &str = "/subscriptions";

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub display_name: String,
    pub state: String,
}

impl From<&Value> for Subscription {
    fn from(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();
        Self {
            subscription_id: field("subscriptionId"),
            display_name: field("displayName"),
            state: field("state"),
        }
    }
}

impl Subscription {
    pub fn is_enabled(&self) -> bool {
        self.state == "Enabled"
    }
}

/// Direct child of a management group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChild {
    Group(Scope),
    Subscription(Scope),
}

impl GroupChild {
    fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type").and_then(|v| v.as_str())?;
        let id = value.get("name").and_then(|v| v.as_str())?;
        let name = value.get("displayName").and_then(|v| v.as_str()).unwrap_or("");
        if kind.eq_ignore_ascii_case(GROUP_TYPE) {
            Some(GroupChild::Group(Scope::folder(id).with_name(name)))
        } else if kind.eq_ignore_ascii_case(SUBSCRIPTION_TYPE) {
            Some(GroupChild::Subscription(Scope::terminal(id).with_name(name)))
        } else {
            None
        }
    }
}

/// Every enabled subscription the caller can see
pub async fn list_subscriptions(client: &AzureClient) -> Result<Vec<Subscription>> {
    let url = client.arm_url("/subscriptions", SUBSCRIPTIONS_API_VERSION);
    let subscriptions = client.get_all(&url).await?;
    Ok(subscriptions
        .iter()
        .map(Subscription::from)
        .filter(Subscription::is_enabled)
        .collect())
}

/// Direct children of a management group
pub async fn list_group_children(client: &AzureClient, group_id: &str) -> Result<Vec<GroupChild>> {
    let url = format!(
        "{}&$expand=children",
        client.arm_url(
            &format!(
                "/providers/Microsoft.Management/managementGroups/{}",
                urlencoding::encode(group_id)
            ),
            MANAGEMENT_GROUPS_API_VERSION,
        )
    );
    let group = client.get_json(&url).await?;

    Ok(group
        .pointer("/properties/children")
        .and_then(|v| v.as_array())
        .map(|children| children.iter().filter_map(GroupChild::from_value).collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_from_value() {
        let sub = Subscription::from(&json!({
            "subscriptionId": "0000-1111",
            "displayName": "Prod",
            "state": "Enabled"
        }));
        assert_eq!(sub.subscription_id, "0000-1111");
        assert!(sub.is_enabled());
        assert!(!Subscription::from(&json!({"state": "Disabled"})).is_enabled());
    }

    #[test]
    fn test_group_child_types() {
        let group = GroupChild::from_value(&json!({
            "type": "Microsoft.Management/managementGroups",
            "name": "mg-platform",
            "displayName": "Platform"
        }));
        assert_eq!(group, Some(GroupChild::Group(Scope::folder("mg-platform").with_name("Platform"))));

        let sub = GroupChild::from_value(&json!({"type": "/subscriptions", "name": "0000-1111"}));
        assert_eq!(sub, Some(GroupChild::Subscription(Scope::terminal("0000-1111"))));

        assert_eq!(GroupChild::from_value(&json!({"type": "other", "name": "x"})), None);
    }
}
