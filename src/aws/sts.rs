//! STS: caller identity and cross-account role assumption

use super::client::{from_xml, query_params, AwsClient, HOME_REGION};
use super::credentials::AwsCredentials;
use anyhow::{Context, Result};
use serde::Deserialize;

const SERVICE: &str = "sts";
const API_VERSION: &str = "2011-06-15";
const SESSION_DURATION_SECS: u32 = 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetCallerIdentityResponse {
    get_caller_identity_result: CallerIdentity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    pub account: String,
    #[serde(default)]
    pub arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResponse {
    assume_role_result: AssumeRoleResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleResult {
    credentials: SessionCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

pub async fn get_caller_identity(client: &AwsClient, creds: &AwsCredentials) -> Result<CallerIdentity> {
    let params = query_params("GetCallerIdentity", API_VERSION);
    let body = client.query(creds, SERVICE, HOME_REGION, &params).await?;
    let response: GetCallerIdentityResponse = from_xml(&body)?;
    Ok(response.get_caller_identity_result)
}

/// Temporary credentials for `role_name` in `account_id`
pub async fn assume_role(
    client: &AwsClient,
    creds: &AwsCredentials,
    account_id: &str,
    role_name: &str,
) -> Result<AwsCredentials> {
    let arn = role_arn(account_id, role_name);
    let mut params = query_params("AssumeRole", API_VERSION);
    params.insert("RoleArn".to_string(), arn.clone());
    params.insert(
        "RoleSessionName".to_string(),
        format!("vcensus-{}", uuid::Uuid::new_v4().simple()),
    );
    params.insert("DurationSeconds".to_string(), SESSION_DURATION_SECS.to_string());

    tracing::debug!("Assuming {}", arn);
    let body = client
        .query(creds, SERVICE, HOME_REGION, &params)
        .await
        .with_context(|| format!("Failed to assume {}", arn))?;
    let response: AssumeRoleResponse = from_xml(&body)?;
    let session = response.assume_role_result.credentials;

    Ok(AwsCredentials::new(
        session.access_key_id,
        session.secret_access_key,
        Some(session.session_token),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_arn() {
        assert_eq!(
            role_arn("123456789012", "OrganizationAccountAccessRole"),
            "arn:aws:iam::123456789012:role/OrganizationAccountAccessRole"
        );
    }

    #[test]
    fn test_parse_assume_role_response() {
        let body = r#"<AssumeRoleResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleResult>
    <AssumedRoleUser>
      <Arn>arn:aws:sts::123456789012:assumed-role/OrganizationAccountAccessRole/vcensus</Arn>
      <AssumedRoleId>AROA:vcensus</AssumedRoleId>
    </AssumedRoleUser>
    <Credentials>
      <AccessKeyId>ASIAEXAMPLE</AccessKeyId>
      <SecretAccessKey>secret</SecretAccessKey>
      <SessionToken>token</SessionToken>
      <Expiration>2026-10-19T12:00:00Z</Expiration>
    </Credentials>
  </AssumeRoleResult>
  <ResponseMetadata><RequestId>r-1</RequestId></ResponseMetadata>
</AssumeRoleResponse>"#;
        let response: AssumeRoleResponse = from_xml(body).unwrap();
        let creds = response.assume_role_result.credentials;
        assert_eq!(creds.access_key_id, "ASIAEXAMPLE");
        assert_eq!(creds.session_token, "token");
    }

    #[test]
    fn test_parse_caller_identity() {
        let body = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::111122223333:user/auditor</Arn>
    <UserId>AIDA</UserId>
    <Account>111122223333</Account>
  </GetCallerIdentityResult>
</GetCallerIdentityResponse>"#;
        let response: GetCallerIdentityResponse = from_xml(body).unwrap();
        assert_eq!(response.get_caller_identity_result.account, "111122223333");
    }
}
