use crate::error::{AppError, Result};
use crate::tautulli::{excerpt, normalize_base_url};
use lazy_regex::{Regex, regex};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const SERVICE: &str = "Plex";
const ACCEPT_ANY: &str = "application/json, application/xml;q=0.9, */*;q=0.8";

/// Library section kinds understood by `/search`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlexKind {
    Movie,
    Show,
}

impl PlexKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_lowercase().as_str() {
            "movie" => Some(Self::Movie),
            "show" => Some(Self::Show),
            _ => None,
        }
    }

    const fn search_type(self) -> &'static str {
        match self {
            Self::Movie => "1",
            Self::Show => "2",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexIdentity {
    pub machine_identifier: Option<String>,
    pub version: Option<String>,
}

/// Metadata item returned by a search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexItem {
    pub title: Option<String>,
    pub year: Option<u32>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub rating_key: Option<String>,
    pub guid: Option<String>,
    pub key: Option<String>,
    pub thumb: Option<String>,
    pub art: Option<String>,
    pub summary: Option<String>,
}

/// Minimal Plex Media Server client for reachability checks and search
pub struct PlexClient {
    base_url: String,
    token: String,
    timeout_secs: u64,
    client: Client,
}

impl PlexClient {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        if url.trim().is_empty() || token.trim().is_empty() {
            return Err(AppError::NotConfigured { service: SERVICE });
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::External(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: normalize_base_url(url),
            token: token.trim().to_string(),
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    /// GET a server path, returning the content type and body of a 2xx response
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<(String, String)> {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));

        let response = self
            .client
            .get(&url)
            .query(&[("X-Plex-Token", self.token.as_str())])
            .query(query)
            .header(ACCEPT, ACCEPT_ANY)
            .header(
                USER_AGENT,
                concat!("plexletter/", env!("CARGO_PKG_VERSION")),
            )
            .send()
            .await
            .map_err(|e| AppError::from_request(SERVICE, self.timeout_secs, &e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::from_request(SERVICE, self.timeout_secs, &e))?;

        if !status.is_success() {
            return Err(AppError::External(format!(
                "HTTP {status}{}",
                excerpt(&body)
            )));
        }

        Ok((content_type, body))
    }

    /// Fetch `/identity`; success means the server is reachable and the token accepted
    pub async fn identity(&self) -> Result<PlexIdentity> {
        let (content_type, body) = self.get("identity", &[]).await?;

        let identity = if is_json(&content_type, &body) {
            let doc: Value = serde_json::from_str(&body)?;
            let container = &doc["MediaContainer"];
            PlexIdentity {
                machine_identifier: container["machineIdentifier"].as_str().map(str::to_string),
                version: container["version"].as_str().map(str::to_string),
            }
        } else {
            let attrs = container_attributes(&body);
            PlexIdentity {
                machine_identifier: attrs.get("machineIdentifier").cloned(),
                version: attrs.get("version").cloned(),
            }
        };

        tracing::info!(
            "Plex reachable: {} (version {})",
            identity.machine_identifier.as_deref().unwrap_or("unknown id"),
            identity.version.as_deref().unwrap_or("unknown")
        );
        Ok(identity)
    }

    /// Search the library; older servers answer in XML only
    pub async fn search(&self, query: &str, kind: Option<PlexKind>) -> Result<Vec<PlexItem>> {
        let mut params = vec![("query", query)];
        if let Some(kind) = kind {
            params.push(("type", kind.search_type()));
        }

        let (content_type, body) = self.get("search", &params).await?;

        if is_json(&content_type, &body) {
            let doc: Value = serde_json::from_str(&body)?;
            let items = doc
                .pointer("/MediaContainer/Metadata")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| serde_json::from_value(normalize_item(item)).ok())
                        .collect()
                })
                .unwrap_or_default();
            Ok(items)
        } else {
            tracing::debug!("Plex search returned non-JSON ({content_type}), scanning XML");
            Ok(xml_items(&body))
        }
    }
}

fn is_json(content_type: &str, body: &str) -> bool {
    content_type.to_lowercase().contains("application/json") || body.trim_start().starts_with('{')
}

/// Plex sends `ratingKey` as a string but `year` as a number; older servers vary
fn normalize_item(item: &Value) -> Value {
    let mut item = item.clone();
    if let Some(map) = item.as_object_mut() {
        if let Some(key) = map.get("ratingKey").filter(|k| k.is_number()).cloned() {
            map.insert("ratingKey".to_string(), Value::String(key.to_string()));
        }
        if let Some(year) = map.get("year").and_then(Value::as_str).map(str::to_string) {
            map.insert(
                "year".to_string(),
                year.parse::<u32>().map_or(Value::Null, Value::from),
            );
        }
    }
    item
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn attributes(tag_body: &str) -> HashMap<String, String> {
    let re: &Regex = regex!(r#"([A-Za-z_][\w.-]*)="([^"]*)""#);
    re.captures_iter(tag_body)
        .map(|caps| (caps[1].to_string(), unescape_xml(&caps[2])))
        .collect()
}

fn container_attributes(xml: &str) -> HashMap<String, String> {
    let re: &Regex = regex!(r"<MediaContainer\b([^>]*)>");
    re.captures(xml)
        .map(|caps| attributes(&caps[1]))
        .unwrap_or_default()
}

fn xml_items(xml: &str) -> Vec<PlexItem> {
    let re: &Regex = regex!(r"<(?:Video|Directory)\b([^>]*)>");
    re.captures_iter(xml)
        .map(|caps| {
            let attrs = attributes(&caps[1]);
            let get = |name: &str| attrs.get(name).cloned();
            PlexItem {
                title: get("title"),
                year: attrs.get("year").and_then(|y| y.parse().ok()),
                kind: get("type"),
                rating_key: get("ratingKey"),
                guid: get("guid"),
                key: get("key"),
                thumb: get("thumb"),
                art: get("art"),
                summary: get("summary"),
            }
        })
        .filter(|item| item.rating_key.is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> PlexClient {
        PlexClient::new(&server.base_url(), "plex-token", Duration::from_secs(5))
            .expect("Should create client")
    }

    #[test]
    fn test_not_configured() {
        assert!(matches!(
            PlexClient::new("http://plex:32400", "", Duration::from_secs(5)),
            Err(AppError::NotConfigured { service: "Plex" })
        ));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(PlexKind::parse("Movie"), Some(PlexKind::Movie));
        assert_eq!(PlexKind::parse("show"), Some(PlexKind::Show));
        assert_eq!(PlexKind::parse("music"), None);
    }

    #[test]
    fn test_xml_items() {
        let xml = r#"<?xml version="1.0"?>
<MediaContainer size="2">
  <Video ratingKey="96959" key="/library/metadata/96959" type="movie" title="Mission: Impossible &amp; Co" year="1996" thumb="/library/metadata/96959/thumb/1"/>
  <Directory ratingKey="500" type="show" title="The Wire"/>
  <Directory key="/hubs" title="No rating key"/>
</MediaContainer>"#;

        let items = xml_items(xml);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("Mission: Impossible & Co"));
        assert_eq!(items[0].year, Some(1996));
        assert_eq!(items[0].kind.as_deref(), Some("movie"));
        assert_eq!(items[1].rating_key.as_deref(), Some("500"));
    }

    #[test]
    fn test_container_attributes() {
        let xml = r#"<MediaContainer size="0" machineIdentifier="abc123" version="1.40.1.8227"></MediaContainer>"#;
        let attrs = container_attributes(xml);
        assert_eq!(attrs.get("machineIdentifier").map(String::as_str), Some("abc123"));
        assert_eq!(attrs.get("version").map(String::as_str), Some("1.40.1.8227"));
    }

    #[test]
    fn test_normalize_item() {
        let item: PlexItem =
            serde_json::from_value(normalize_item(&json!({"ratingKey": 12, "year": "2001", "title": "A"})))
                .expect("Should deserialize");
        assert_eq!(item.rating_key.as_deref(), Some("12"));
        assert_eq!(item.year, Some(2001));
    }

    #[tokio::test]
    async fn test_identity_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/identity")
                    .query_param("X-Plex-Token", "plex-token");
                then.status(200).json_body(json!({
                    "MediaContainer": {"size": 0, "machineIdentifier": "abc", "version": "1.41.0"}
                }));
            })
            .await;

        let identity = client_for(&server).identity().await.expect("Should reach Plex");
        mock.assert_async().await;
        assert_eq!(identity.machine_identifier.as_deref(), Some("abc"));
        assert_eq!(identity.version.as_deref(), Some("1.41.0"));
    }

    #[tokio::test]
    async fn test_identity_xml() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/identity");
                then.status(200)
                    .header("content-type", "text/xml")
                    .body(r#"<?xml version="1.0"?><MediaContainer machineIdentifier="xyz" version="1.32"/>"#);
            })
            .await;

        let identity = client_for(&server).identity().await.expect("Should reach Plex");
        assert_eq!(identity.machine_identifier.as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_identity_unauthorized() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/identity");
                then.status(401).body("Unauthorized");
            })
            .await;

        let err = client_for(&server).identity().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_search_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/search")
                    .query_param("query", "heat")
                    .query_param("type", "1");
                then.status(200).json_body(json!({
                    "MediaContainer": {
                        "Metadata": [
                            {"title": "Heat", "year": 1995, "type": "movie", "ratingKey": "42", "key": "/library/metadata/42"}
                        ]
                    }
                }));
            })
            .await;

        let items = client_for(&server)
            .search("heat", Some(PlexKind::Movie))
            .await
            .expect("Should search");
        mock.assert_async().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Heat"));
        assert_eq!(items[0].year, Some(1995));
    }
}
