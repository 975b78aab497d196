//! Remote identity directory client.
//!
//! [`DirectoryClient`] is the contract the reconciliation engine needs:
//! look people up by email and create them. [`RestDirectoryClient`] speaks
//! the ServiceNow-style table API (`/api/now/table/{table}`) over blocking
//! HTTPS with basic auth.

use std::time::Duration;

use log::debug;
use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{config::DirectoryConfig, error::DirectoryError, store::EmployeeRecord};

/// A directory entry matched by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryEntry {
    #[serde(rename = "sys_id")]
    pub remote_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Fields sent when creating a directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDirectoryRecord {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(rename = "title", skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl From<&EmployeeRecord> for NewDirectoryRecord {
    fn from(record: &EmployeeRecord) -> Self {
        Self {
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            email: record.email.clone(),
            user_name: record.email.clone(),
            department: record.department.clone(),
            position: record.position.clone(),
        }
    }
}

pub trait DirectoryClient {
    /// Entries whose email equals `email`; empty when there are none.
    ///
    /// Transport and authentication failures are errors, never an empty list.
    fn lookup_by_email(&self, email: &str) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Create an entry and return its remote identifier.
    fn create_record(&self, record: &NewDirectoryRecord) -> Result<String, DirectoryError>;
}

impl<T: DirectoryClient + ?Sized> DirectoryClient for &T {
    fn lookup_by_email(&self, email: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        (**self).lookup_by_email(email)
    }

    fn create_record(&self, record: &NewDirectoryRecord) -> Result<String, DirectoryError> {
        (**self).create_record(record)
    }
}

pub struct RestDirectoryClient {
    client: Client,
    table_url: Url,
    username: String,
    password: String,
}

impl RestDirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|err| DirectoryError::InvalidUrl(format!("{}: {err}", config.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(DirectoryError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                config.base_url,
                base.scheme()
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let table_url = base
            .join(&format!("api/now/table/{}", config.table))
            .map_err(|err| DirectoryError::InvalidUrl(err.to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| DirectoryError::Other(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            table_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn table_url(&self) -> &Url {
        &self.table_url
    }

    fn lookup_url(&self, email: &str) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("sysparm_query", &format!("email={email}"))
            .append_pair("sysparm_fields", "sys_id,email,user_name")
            .append_pair("sysparm_limit", "1");
        url
    }

    fn read_body(&self, url: &Url, response: Response) -> Result<String, DirectoryError> {
        let status = response.status();
        let body = response.text().map_err(|source| DirectoryError::Transport {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

impl DirectoryClient for RestDirectoryClient {
    fn lookup_by_email(&self, email: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let url = self.lookup_url(email);
        debug!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|source| DirectoryError::Transport {
                url: url.to_string(),
                source,
            })?;
        let body = self.read_body(&url, response)?;
        parse_lookup_body(&body)
    }

    fn create_record(&self, record: &NewDirectoryRecord) -> Result<String, DirectoryError> {
        let url = self.table_url.clone();
        debug!("POST {url} for {}", record.email);
        let response = self
            .client
            .post(url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(record)
            .send()
            .map_err(|source| DirectoryError::Transport {
                url: url.to_string(),
                source,
            })?;
        let body = self.read_body(&url, response)?;
        parse_create_body(&body)
    }
}

/// Decode a lookup response. A missing or null `result` means no match.
pub fn parse_lookup_body(body: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|err| DirectoryError::Malformed(format!("lookup body is not JSON: {err}")))?;
    match json.get("result") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone()).map_err(|err| {
                    DirectoryError::Malformed(format!("lookup entry without sys_id: {err}"))
                })
            })
            .collect(),
        Some(single @ Value::Object(_)) => serde_json::from_value(single.clone())
            .map(|entry| vec![entry])
            .map_err(|err| DirectoryError::Malformed(format!("lookup entry without sys_id: {err}"))),
        Some(other) => Err(DirectoryError::Malformed(format!(
            "unexpected lookup result: {other}"
        ))),
    }
}

/// Extract the new remote identifier from a create response.
pub fn parse_create_body(body: &str) -> Result<String, DirectoryError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|err| DirectoryError::Malformed(format!("create body is not JSON: {err}")))?;
    json.pointer("/result/sys_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|sys_id| !sys_id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DirectoryError::Malformed("create response has no result.sys_id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> DirectoryConfig {
        DirectoryConfig {
            base_url: base_url.to_string(),
            ..DirectoryConfig::default()
        }
    }

    #[test]
    fn lookup_without_result_field_is_not_found() {
        assert!(parse_lookup_body("{}").unwrap().is_empty());
        assert!(parse_lookup_body(r#"{"result": []}"#).unwrap().is_empty());
        assert!(parse_lookup_body(r#"{"result": null}"#).unwrap().is_empty());
    }

    #[test]
    fn lookup_reads_sys_ids_in_order() {
        let entries = parse_lookup_body(
            r#"{"result": [{"sys_id": "SYS9", "email": "c@x.com"}, {"sys_id": "SYS10"}]}"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].remote_id, "SYS9");
        assert_eq!(entries[0].email.as_deref(), Some("c@x.com"));
        assert_eq!(entries[1].user_name, None);
    }

    #[test]
    fn lookup_rejects_non_json_and_entries_without_id() {
        assert!(matches!(
            parse_lookup_body("<html>login</html>"),
            Err(DirectoryError::Malformed(_))
        ));
        assert!(parse_lookup_body(r#"{"result": [{"email": "a@x.com"}]}"#).is_err());
    }

    #[test]
    fn create_requires_sys_id() {
        assert_eq!(
            parse_create_body(r#"{"result": {"sys_id": "SYS2", "email": "a@x.com"}}"#).unwrap(),
            "SYS2"
        );
        assert!(parse_create_body(r#"{"result": {"sys_id": ""}}"#).is_err());
        assert!(parse_create_body(r#"{"result": {}}"#).is_err());
    }

    #[test]
    fn new_record_maps_position_to_title() {
        let record = EmployeeRecord {
            id: 7,
            first_name: "Ana".into(),
            last_name: "Lima".into(),
            email: "ana@x.com".into(),
            department: Some("Finance".into()),
            position: None,
            hire_date: None,
            synced: false,
            synced_at: None,
            remote_id: None,
        };
        let body = serde_json::to_value(NewDirectoryRecord::from(&record)).unwrap();
        assert_eq!(body["user_name"], "ana@x.com");
        assert_eq!(body["department"], "Finance");
        assert!(body.get("title").is_none());
    }

    #[test]
    fn lookup_url_encodes_the_query() {
        let client = RestDirectoryClient::new(&config("https://acme.service-now.com")).unwrap();
        assert_eq!(
            client.table_url().as_str(),
            "https://acme.service-now.com/api/now/table/sys_user"
        );
        let url = client.lookup_url("a+b@x.com");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(query[0], ("sysparm_query".into(), "email=a+b@x.com".into()));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            RestDirectoryClient::new(&config("not a url")),
            Err(DirectoryError::InvalidUrl(_))
        ));
    }
}
