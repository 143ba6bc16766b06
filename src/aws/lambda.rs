//! Lambda functions, reported for information only

use super::client::AwsClient;
use super::credentials::AwsCredentials;
use crate::inventory::model::{Capacity, InstanceState, ResourceClass, ResourceDescriptor};
use anyhow::Result;
use serde_json::Value;

const SERVICE: &str = "lambda";
const FUNCTIONS_PATH: &str = "/2015-03-31/functions/";
const MAX_ITEMS: u32 = 50;

pub fn function_descriptor(account_id: &str, region: &str, function: &Value) -> ResourceDescriptor {
    let arn = function
        .get("FunctionArn")
        .or_else(|| function.get("FunctionName"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    ResourceDescriptor::new(
        arn,
        account_id,
        ResourceClass::ServerlessFunction,
        Capacity::Informational,
        region,
        InstanceState::Running,
    )
}

pub async fn list_functions(
    client: &AwsClient,
    creds: &AwsCredentials,
    account_id: &str,
    region: &str,
) -> Result<Vec<ResourceDescriptor>> {
    let mut descriptors = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let mut path = format!("{}?MaxItems={}", FUNCTIONS_PATH, MAX_ITEMS);
        if let Some(m) = &marker {
            path.push_str(&format!("&Marker={}", urlencoding::encode(m)));
        }

        let page = client.rest_get(creds, SERVICE, region, &path).await?;
        if let Some(functions) = page.get("Functions").and_then(|v| v.as_array()) {
            descriptors.extend(functions.iter().map(|f| function_descriptor(account_id, region, f)));
        }

        let next = page
            .get("NextMarker")
            .and_then(|v| v.as_str())
            .filter(|m| !m.is_empty() && marker.as_deref() != Some(*m))
            .map(|m| m.to_string());
        match next {
            Some(m) => marker = Some(m),
            None => break,
        }
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_descriptor_is_informational() {
        let d = function_descriptor(
            "123",
            "us-east-1",
            &json!({"FunctionName": "resize", "FunctionArn": "arn:aws:lambda:us-east-1:123:function:resize"}),
        );
        assert_eq!(d.class, ResourceClass::ServerlessFunction);
        assert_eq!(d.capacity, Capacity::Informational);
        assert_eq!(d.id, "arn:aws:lambda:us-east-1:123:function:resize");
        assert!(!d.class.is_billable());
    }
}
