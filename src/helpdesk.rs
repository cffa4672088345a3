//! Helpdesk client (Zoho Desk REST API v1).
//!
//! The [`Helpdesk`] trait is the seam the poll worker and CLI talk to;
//! [`ZohoDesk`] is the HTTP implementation. Every response is validated
//! right here and turned into explicit types, so nothing downstream sees
//! raw JSON.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`Helpdesk::refresh_token`] | `POST {accounts_url}` form `grant_type=refresh_token` |
//! | [`Helpdesk::list_active_tickets`] | `GET {base}/tickets?limit=N&status=A,B` |
//! | [`Helpdesk::add_private_note`] | `POST {base}/tickets/{id}/comments` `{isPublic:false, content}` |
//! | [`Helpdesk::update_priority`] | `PUT {base}/tickets/{id}` `{priority}` |
//! | [`Helpdesk::create_ticket`] | `POST {base}/tickets` |
//! | [`Helpdesk::list_departments`] | `GET {base}/departments` |
//!
//! Requests carry `Authorization: Zoho-oauthtoken <token>` and `orgId`.
//!
//! # Payload tolerance
//!
//! - ids may be JSON strings or numbers; both become strings
//! - list bodies may be `{ "data": [...] }`, a bare array, or empty (HTTP 204)
//! - list entries without an id are dropped

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use helpdesk_triage_core::models::Priority;

use crate::config::{HelpdeskConfig, HelpdeskCredentials};

/// Token lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// A short-lived bearer token.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: u64,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A ticket as listed by the helpdesk, after validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelpdeskTicket {
    pub id: String,
    pub subject: String,
    pub description: String,
    pub status: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    /// `accountName`, else `contact.accountName`, else empty.
    pub site: String,
    /// `cf_isp`, else `customFields.cf_isp`, else empty.
    pub isp: String,
    /// `contact.firstName`, else `email`.
    pub customer_name: Option<String>,
}

impl HelpdeskTicket {
    /// Time used for the poller's staleness check: modified, else created.
    pub fn activity_time(&self) -> Option<DateTime<Utc>> {
        self.modified_time.or(self.created_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Department {
    pub id: String,
    pub name: String,
}

/// Payload for [`Helpdesk::create_ticket`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub department_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[async_trait]
pub trait Helpdesk: Send + Sync {
    /// Exchange the refresh token for an access token.
    async fn refresh_token(&self) -> Result<AccessToken>;

    async fn list_active_tickets(
        &self,
        token: &AccessToken,
        statuses: &[String],
        limit: usize,
    ) -> Result<Vec<HelpdeskTicket>>;

    async fn add_private_note(&self, token: &AccessToken, ticket_id: &str, text: &str)
        -> Result<()>;

    async fn update_priority(
        &self,
        token: &AccessToken,
        ticket_id: &str,
        priority: Priority,
    ) -> Result<()>;

    async fn create_ticket(&self, token: &AccessToken, ticket: &NewTicket) -> Result<()>;

    async fn list_departments(&self, token: &AccessToken) -> Result<Vec<Department>>;
}

// ============ Zoho Desk ============

pub struct ZohoDesk {
    base_url: String,
    accounts_url: String,
    org_id: String,
    credentials: HelpdeskCredentials,
    client: reqwest::Client,
}

impl ZohoDesk {
    pub fn new(config: &HelpdeskConfig, credentials: HelpdeskCredentials) -> Result<Self> {
        let org_id = config
            .org_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("helpdesk.org_id (or ZOHO_ORG_ID) is required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            accounts_url: config.accounts_url.clone(),
            org_id,
            credentials,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder, token: &AccessToken) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Zoho-oauthtoken {}", token.token))
            .header("orgId", &self.org_id)
    }
}

/// Fail with status and body text unless the response is 2xx.
async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} failed: HTTP {}: {}", what, status, body);
}

#[async_trait]
impl Helpdesk for ZohoDesk {
    async fn refresh_token(&self) -> Result<AccessToken> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];
        let response = self
            .client
            .post(&self.accounts_url)
            .form(&form)
            .send()
            .await
            .context("token refresh request failed")?;
        let response = ensure_success(response, "token refresh").await?;
        let json: serde_json::Value = response.json().await?;
        parse_token_response(&json)
    }

    async fn list_active_tickets(
        &self,
        token: &AccessToken,
        statuses: &[String],
        limit: usize,
    ) -> Result<Vec<HelpdeskTicket>> {
        let mut query = vec![("limit", limit.to_string())];
        if !statuses.is_empty() {
            query.push(("status", statuses.join(",")));
        }
        let response = self
            .authed(self.client.get(self.url("/tickets")), token)
            .query(&query)
            .send()
            .await
            .context("ticket list request failed")?;
        let response = ensure_success(response, "ticket list").await?;
        let body = response.text().await?;
        parse_ticket_list(&body)
    }

    async fn add_private_note(
        &self,
        token: &AccessToken,
        ticket_id: &str,
        text: &str,
    ) -> Result<()> {
        let body = serde_json::json!({ "isPublic": false, "content": text });
        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("/tickets/{}/comments", ticket_id))),
                token,
            )
            .json(&body)
            .send()
            .await
            .context("add note request failed")?;
        ensure_success(response, "add note").await?;
        Ok(())
    }

    async fn update_priority(
        &self,
        token: &AccessToken,
        ticket_id: &str,
        priority: Priority,
    ) -> Result<()> {
        let body = serde_json::json!({ "priority": priority.as_str() });
        let response = self
            .authed(
                self.client.put(self.url(&format!("/tickets/{}", ticket_id))),
                token,
            )
            .json(&body)
            .send()
            .await
            .context("update priority request failed")?;
        ensure_success(response, "update priority").await?;
        Ok(())
    }

    async fn create_ticket(&self, token: &AccessToken, ticket: &NewTicket) -> Result<()> {
        let response = self
            .authed(self.client.post(self.url("/tickets")), token)
            .json(ticket)
            .send()
            .await
            .context("create ticket request failed")?;
        ensure_success(response, "create ticket").await?;
        Ok(())
    }

    async fn list_departments(&self, token: &AccessToken) -> Result<Vec<Department>> {
        let response = self
            .authed(self.client.get(self.url("/departments")), token)
            .send()
            .await
            .context("department list request failed")?;
        let response = ensure_success(response, "department list").await?;
        let body = response.text().await?;
        parse_departments(&body)
    }
}

// ============ Response schemas ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicket {
    id: Option<serde_json::Value>,
    subject: Option<String>,
    description: Option<String>,
    status: Option<String>,
    created_time: Option<String>,
    modified_time: Option<String>,
    account_name: Option<String>,
    email: Option<String>,
    contact: Option<RawContact>,
    #[serde(rename = "cf_isp")]
    cf_isp: Option<String>,
    custom_fields: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContact {
    first_name: Option<String>,
    account_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDepartment {
    id: Option<serde_json::Value>,
    name: Option<String>,
}

/// String or number id; anything else is treated as absent.
fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_token_response(json: &serde_json::Value) -> Result<AccessToken> {
    let token = json
        .get("access_token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            let detail = json
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("missing access_token");
            anyhow!("token refresh rejected: {}", detail)
        })?;
    let expires_in = json
        .get("expires_in")
        .and_then(|e| e.as_u64())
        .filter(|&e| e > 0)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Ok(AccessToken {
        token: token.to_string(),
        expires_in,
    })
}

/// Unwrap `{data: [...]}` or a bare array. Blank bodies are empty lists.
fn list_items(body: &str) -> Result<Vec<serde_json::Value>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let json: serde_json::Value =
        serde_json::from_str(body).context("helpdesk returned invalid JSON")?;
    match json {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => Ok(items),
            Some(serde_json::Value::Null) | None => Ok(Vec::new()),
            Some(_) => bail!("helpdesk list response has a non-array 'data' field"),
        },
        _ => bail!("unexpected helpdesk list response"),
    }
}

fn into_ticket(raw: RawTicket) -> Option<HelpdeskTicket> {
    let id = raw.id.as_ref().and_then(id_string)?;
    let contact = raw.contact.unwrap_or_default();
    let site = non_blank(raw.account_name)
        .or(non_blank(contact.account_name))
        .unwrap_or_default();
    let isp = non_blank(raw.cf_isp)
        .or_else(|| {
            raw.custom_fields
                .as_ref()
                .and_then(|cf| cf.get("cf_isp"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();
    Some(HelpdeskTicket {
        id,
        subject: raw.subject.unwrap_or_default(),
        description: raw.description.unwrap_or_default(),
        status: non_blank(raw.status),
        created_time: parse_time(raw.created_time.as_deref()),
        modified_time: parse_time(raw.modified_time.as_deref()),
        site,
        isp,
        customer_name: non_blank(contact.first_name).or(non_blank(raw.email)),
    })
}

/// Tickets from a list response. Entries that are malformed or have no id
/// are skipped so one bad ticket cannot block the rest of the batch.
pub fn parse_ticket_list(body: &str) -> Result<Vec<HelpdeskTicket>> {
    let mut tickets = Vec::new();
    for item in list_items(body)? {
        let id = item.get("id").and_then(id_string);
        let raw: RawTicket = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(ticket_id = ?id, error = %e, "skipping malformed ticket entry");
                continue;
            }
        };
        match into_ticket(raw) {
            Some(ticket) => tickets.push(ticket),
            None => tracing::debug!("dropping ticket entry without id"),
        }
    }
    Ok(tickets)
}

pub fn parse_departments(body: &str) -> Result<Vec<Department>> {
    let mut departments = Vec::new();
    for item in list_items(body)? {
        let raw: RawDepartment =
            serde_json::from_value(item).context("malformed department entry")?;
        if let Some(id) = raw.id.as_ref().and_then(id_string) {
            departments.push(Department {
                id,
                name: raw.name.unwrap_or_default(),
            });
        }
    }
    Ok(departments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_list() {
        let body = r#"{"data":[{
            "id":"1001","subject":"Login not working","description":"cannot sign in",
            "status":"Open","createdTime":"2024-03-01T10:00:00.000Z",
            "modifiedTime":"2024-03-02T08:30:00.000Z",
            "accountName":"Plant 4","cf_isp":"FiberCo",
            "contact":{"firstName":"Dana","accountName":"Ignored"}
        }]}"#;
        let tickets = parse_ticket_list(body).unwrap();
        assert_eq!(tickets.len(), 1);
        let t = &tickets[0];
        assert_eq!(t.id, "1001");
        assert_eq!(t.site, "Plant 4");
        assert_eq!(t.isp, "FiberCo");
        assert_eq!(t.customer_name.as_deref(), Some("Dana"));
        assert_eq!(t.status.as_deref(), Some("Open"));
        assert_eq!(
            t.activity_time().unwrap().to_rfc3339(),
            "2024-03-02T08:30:00+00:00"
        );
    }

    #[test]
    fn test_malformed_entry_does_not_hide_the_rest() {
        let body = r#"{"data":[
            {"id":"1","subject":"Login not working"},
            {"id":"2","subject":12345}
        ]}"#;
        let tickets = parse_ticket_list(body).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].id, "1");
        assert_eq!(tickets[0].subject, "Login not working");
    }

    #[test]
    fn test_parse_bare_array_numeric_ids_and_fallbacks() {
        let body = r#"[
            {"id": 42, "subject": "Refund", "email": "pat@example.com",
             "contact": {"accountName": "North Site"},
             "customFields": {"cf_isp": "AirNet"}, "createdTime": "2024-01-05T00:00:00Z"},
            {"subject": "no id here"},
            {"id": null, "subject": "null id"},
            {"id": "43", "subject": 12345},
            {"id": "44", "status": {"name": "Open"}}
        ]"#;
        let tickets = parse_ticket_list(body).unwrap();
        assert_eq!(tickets.len(), 1);
        let t = &tickets[0];
        assert_eq!(t.id, "42");
        assert_eq!(t.site, "North Site");
        assert_eq!(t.isp, "AirNet");
        assert_eq!(t.customer_name.as_deref(), Some("pat@example.com"));
        assert!(t.modified_time.is_none());
        assert!(t.activity_time().is_some());
        assert!(t.status.is_none());
    }

    #[test]
    fn test_parse_empty_bodies() {
        assert!(parse_ticket_list("").unwrap().is_empty());
        assert!(parse_ticket_list("   ").unwrap().is_empty());
        assert!(parse_ticket_list("{}").unwrap().is_empty());
        assert!(parse_ticket_list(r#"{"data":null}"#).unwrap().is_empty());
        assert!(parse_ticket_list("\"nope\"").is_err());
        assert!(parse_ticket_list("not json").is_err());
    }

    #[test]
    fn test_parse_departments() {
        let body = r#"{"data":[{"id":7,"name":"Support"},{"id":"8","name":"Sales"},{"name":"orphan"}]}"#;
        let depts = parse_departments(body).unwrap();
        assert_eq!(
            depts,
            vec![
                Department { id: "7".into(), name: "Support".into() },
                Department { id: "8".into(), name: "Sales".into() },
            ]
        );
    }

    #[test]
    fn test_parse_token_response() {
        let t = parse_token_response(&serde_json::json!({"access_token": "abc", "expires_in": 1800}))
            .unwrap();
        assert_eq!(t.token, "abc");
        assert_eq!(t.expires_in, 1800);

        let t = parse_token_response(&serde_json::json!({"access_token": "abc"})).unwrap();
        assert_eq!(t.expires_in, 3600);

        let err = parse_token_response(&serde_json::json!({"error": "invalid_code"})).unwrap_err();
        assert!(err.to_string().contains("invalid_code"));
    }

    #[test]
    fn test_new_ticket_serializes_camel_case() {
        let ticket = NewTicket {
            subject: "Login not working".into(),
            description: "spawned".into(),
            department_id: "7".into(),
            contact_id: None,
            email: Some("ops@example.com".into()),
        };
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["departmentId"], "7");
        assert_eq!(json["email"], "ops@example.com");
        assert!(json.get("contactId").is_none());
    }

    #[test]
    fn test_requires_org_id() {
        let creds = HelpdeskCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
        };
        assert!(ZohoDesk::new(&HelpdeskConfig::default(), creds).is_err());
    }

    #[test]
    fn test_access_token_debug_redacts() {
        let t = AccessToken {
            token: "supersecret".into(),
            expires_in: 10,
        };
        assert!(!format!("{:?}", t).contains("supersecret"));
    }
}
