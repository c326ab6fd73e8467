use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    config::{AdminApiAccess, Settings},
    dialect::ApiDialect,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("'{url}' can't be used as an endpoint: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Failed to connect for '{request}': {source}")]
    FailedToConnect {
        request: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Got a status code of {status} for '{request}' but couldn't read the body: {source}")]
    UnreadableBody {
        request: String,
        status: StatusCode,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to '{request}', got a status code of: {status}")]
    BadResponse {
        request: String,
        status: StatusCode,
        body: String,
    },
    #[error("The response to '{request}' was not valid JSON: {source}")]
    InvalidJson {
        request: String,
        status: StatusCode,
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("The response to '{request}' is missing the '{field}' field")]
    MissingField {
        request: String,
        field: &'static str,
        body: Value,
    },
}

impl ApiError {
    /// The HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::BadResponse { status, .. }
            | ApiError::InvalidJson { status, .. }
            | ApiError::UnreadableBody { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The raw response body, when one was read.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::BadResponse { body, .. } | ApiError::InvalidJson { body, .. } => {
                Some(body.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreateTokenBody {
    pub max_usage: u32,
    pub one_time: bool,
    // Older and newer registration services disagree on the name of this
    // field, so both are sent.
    pub ex_date: String,
    pub expiration_date: String,
}

impl CreateTokenBody {
    pub fn single_use(expiration: &str) -> CreateTokenBody {
        CreateTokenBody {
            max_usage: 1,
            one_time: true,
            ex_date: expiration.to_string(),
            expiration_date: expiration.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreatedToken {
    pub name: String,
    pub raw: Value,
}

#[derive(Deserialize, Debug)]
struct ExternalId {
    auth_provider: String,
}

/// Token endpoints of the registration service.
#[async_trait]
pub trait RegistrationApi {
    async fn create_token(&self, expiration: &str) -> Result<CreatedToken, ApiError>;
    async fn token_status(&self, token: &str) -> Result<Value, ApiError>;
    async fn revoke_token(&self, token: &str) -> Result<Value, ApiError>;
    async fn list_tokens(&self) -> Result<Value, ApiError>;
}

/// The slice of the homeserver admin API used for delegated admin checks.
#[async_trait]
pub trait AdminApi {
    /// SSO providers the user's account is linked to.
    async fn auth_providers(&self, user_id: &str) -> Result<Vec<String>, ApiError>;
}

pub struct RegistrationClient<'a> {
    http: &'a reqwest::Client,
    base_url: String,
    secret: &'a str,
    dialect: &'static dyn ApiDialect,
}

impl<'a> RegistrationClient<'a> {
    pub fn new(http: &'a reqwest::Client, settings: &'a Settings) -> RegistrationClient<'a> {
        RegistrationClient {
            http,
            base_url: settings.api_base_url(),
            secret: &settings.admin_secret,
            dialect: settings.dialect,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("SharedSecret {}", self.secret))
    }
}

#[async_trait]
impl<'a> RegistrationApi for RegistrationClient<'a> {
    async fn create_token(&self, expiration: &str) -> Result<CreatedToken, ApiError> {
        let url = endpoint(&self.base_url, &["token"])?;
        let label = format!("POST {}", url);

        let raw = send_json(
            self.request(Method::POST, url)
                .json(&CreateTokenBody::single_use(expiration)),
            &label,
        )
        .await?;

        let name = match raw.get("name").and_then(Value::as_str) {
            Some(n) => n.to_string(),
            None => {
                return Err(ApiError::MissingField {
                    request: label,
                    field: "name",
                    body: raw,
                })
            }
        };

        Ok(CreatedToken { name, raw })
    }

    async fn token_status(&self, token: &str) -> Result<Value, ApiError> {
        let url = endpoint(&self.base_url, &["token", token])?;
        let label = format!("GET {}", url);

        send_json(self.request(Method::GET, url), &label).await
    }

    async fn revoke_token(&self, token: &str) -> Result<Value, ApiError> {
        let url = endpoint(&self.base_url, &["token", token])?;
        let revoke = self.dialect.revoke_request();
        let label = format!("{} {}", revoke.method, url);

        send_json(
            self.request(revoke.method, url).json(&revoke.body),
            &label,
        )
        .await
    }

    async fn list_tokens(&self) -> Result<Value, ApiError> {
        let url = endpoint(&self.base_url, &["token"])?;
        let label = format!("GET {}", url);

        send_json(self.request(Method::GET, url), &label).await
    }
}

pub struct AdminClient<'a> {
    http: &'a reqwest::Client,
    access: &'a AdminApiAccess,
}

impl<'a> AdminClient<'a> {
    pub fn new(http: &'a reqwest::Client, access: &'a AdminApiAccess) -> AdminClient<'a> {
        AdminClient { http, access }
    }
}

#[async_trait]
impl<'a> AdminApi for AdminClient<'a> {
    async fn auth_providers(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        let url = endpoint(
            &self.access.api_url,
            &["_synapse", "admin", "v2", "users", user_id],
        )?;
        let label = format!("GET {}", url);

        let profile = send_json(
            self.http
                .get(url)
                .bearer_auth(&self.access.access_token),
            &label,
        )
        .await?;

        let external_ids = match profile.get("external_ids").cloned() {
            Some(ids) => ids,
            None => {
                return Err(ApiError::MissingField {
                    request: label,
                    field: "external_ids",
                    body: profile,
                })
            }
        };

        let ids: Vec<ExternalId> =
            serde_json::from_value(external_ids).map_err(|_| ApiError::MissingField {
                request: label,
                field: "external_ids[].auth_provider",
                body: profile,
            })?;

        Ok(ids.into_iter().map(|i| i.auth_provider).collect())
    }
}

/// Appends path segments to a base URL, percent-encoding them as needed.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = Url::parse(base).map_err(|e| ApiError::InvalidEndpoint {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ApiError::InvalidEndpoint {
                url: base.to_string(),
                reason: "it can't have a path".to_string(),
            })?;
        path.pop_if_empty().extend(segments);
    }

    Ok(url)
}

async fn send_json(request: RequestBuilder, label: &str) -> Result<Value, ApiError> {
    debug!(request = %label, "sending request");

    let resp = request
        .send()
        .await
        .map_err(|source| ApiError::FailedToConnect {
            request: label.to_string(),
            source,
        })?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|source| ApiError::UnreadableBody {
            request: label.to_string(),
            status,
            source,
        })?;

    if !status.is_success() {
        return Err(ApiError::BadResponse {
            request: label.to_string(),
            status,
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::InvalidJson {
        request: label.to_string(),
        status,
        body,
        source,
    })
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        config::test_settings,
        test_support::{MockApi, Recorded},
    };

    #[test]
    fn test_endpoint_appends_segments() {
        assert_eq!(
            endpoint("https://reg.example.org/api", &["token"])
                .unwrap()
                .as_str(),
            "https://reg.example.org/api/token"
        );
        assert_eq!(
            endpoint("https://reg.example.org/", &["token", "abc"])
                .unwrap()
                .as_str(),
            "https://reg.example.org/token/abc"
        );
        assert_eq!(
            endpoint("https://reg.example.org/api", &["token", ""])
                .unwrap()
                .as_str(),
            "https://reg.example.org/api/token/"
        );
        assert_eq!(
            endpoint("https://reg.example.org/api", &["token", "a b/c"])
                .unwrap()
                .as_str(),
            "https://reg.example.org/api/token/a%20b%2Fc"
        );
        assert!(endpoint("not a url", &["token"]).is_err());
    }

    #[tokio::test]
    async fn test_create_token_posts_single_use_body() {
        let mock = MockApi::start().await;
        mock.respond(Method::POST, "/api/token", 200, r#"{"name":"tok123"}"#);

        let settings = test_settings(&mock.url(), false);
        let http = reqwest::Client::new();
        let client = RegistrationClient::new(&http, &settings);

        let created = client.create_token("2026-10-26").await.unwrap();
        assert_eq!(created.name, "tok123");

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        let Recorded {
            method,
            path,
            authorization,
            body,
        } = &requests[0];
        assert_eq!(method, "POST");
        assert_eq!(path, "/api/token");
        assert_eq!(authorization.as_deref(), Some("SharedSecret s3cret"));
        assert_eq!(
            serde_json::from_str::<Value>(body).unwrap(),
            json!({
                "max_usage": 1,
                "one_time": true,
                "ex_date": "2026-10-26",
                "expiration_date": "2026-10-26",
            })
        );
    }

    #[tokio::test]
    async fn test_create_token_without_name() {
        let mock = MockApi::start().await;
        mock.respond(Method::POST, "/api/token", 200, r#"{"token":"nope"}"#);

        let settings = test_settings(&mock.url(), false);
        let http = reqwest::Client::new();
        let err = RegistrationClient::new(&http, &settings)
            .create_token("2026-10-26")
            .await
            .unwrap_err();

        match err {
            ApiError::MissingField { field, body, .. } => {
                assert_eq!(field, "name");
                assert_eq!(body, json!({"token": "nope"}));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_keeps_status_and_body() {
        let mock = MockApi::start().await;
        mock.respond(Method::GET, "/api/token", 500, "database is on fire");

        let settings = test_settings(&mock.url(), false);
        let http = reqwest::Client::new();
        let err = RegistrationClient::new(&http, &settings)
            .list_tokens()
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(err.body(), Some("database is on fire"));
    }

    #[tokio::test]
    async fn test_non_json_success_is_invalid_json() {
        let mock = MockApi::start().await;
        mock.respond(Method::GET, "/api/token/abc", 200, "<html>hi</html>");

        let settings = test_settings(&mock.url(), false);
        let http = reqwest::Client::new();
        let err = RegistrationClient::new(&http, &settings)
            .token_status("abc")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidJson { .. }));
        assert_eq!(err.status(), Some(StatusCode::OK));
        assert_eq!(err.body(), Some("<html>hi</html>"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_failed_to_connect() {
        let settings = test_settings("http://127.0.0.1:1", false);
        let http = reqwest::Client::new();
        let err = RegistrationClient::new(&http, &settings)
            .list_tokens()
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::FailedToConnect { .. }));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_revoke_uses_dialect_method() {
        let mock = MockApi::start().await;
        mock.respond(Method::PUT, "/token/abc", 200, r#"{"disabled":true}"#);
        mock.respond(Method::PATCH, "/api/token/abc", 200, r#"{"disabled":true}"#);
        let http = reqwest::Client::new();

        let legacy = test_settings(&mock.url(), true);
        RegistrationClient::new(&http, &legacy)
            .revoke_token("abc")
            .await
            .unwrap();

        let current = test_settings(&mock.url(), false);
        RegistrationClient::new(&http, &current)
            .revoke_token("abc")
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].path, "/token/abc");
        assert_eq!(
            serde_json::from_str::<Value>(&requests[0].body).unwrap(),
            json!({"disable": true})
        );
        assert_eq!(requests[1].method, "PATCH");
        assert_eq!(requests[1].path, "/api/token/abc");
        assert_eq!(
            serde_json::from_str::<Value>(&requests[1].body).unwrap(),
            json!({"disabled": true})
        );
    }

    #[tokio::test]
    async fn test_auth_providers() {
        let mock = MockApi::start().await;
        mock.respond(
            Method::GET,
            "/_synapse/admin/v2/users/@bob:example.org",
            200,
            r#"{"name":"@bob:example.org","external_ids":[{"auth_provider":"oidc","external_id":"1"},{"auth_provider":"cas","external_id":"bob"}]}"#,
        );
        let access = AdminApiAccess {
            api_url: mock.url(),
            access_token: "syt_admin".to_string(),
        };
        let http = reqwest::Client::new();

        let providers = AdminClient::new(&http, &access)
            .auth_providers("@bob:example.org")
            .await
            .unwrap();

        assert_eq!(providers, vec!["oidc".to_string(), "cas".to_string()]);
        assert_eq!(
            mock.requests()[0].authorization.as_deref(),
            Some("Bearer syt_admin")
        );
    }

    #[tokio::test]
    async fn test_auth_providers_bad_entry_keeps_profile() {
        let mock = MockApi::start().await;
        mock.respond(
            Method::GET,
            "/_synapse/admin/v2/users/@bob:example.org",
            200,
            r#"{"name":"@bob:example.org","external_ids":[{"external_id":"bob"}]}"#,
        );
        let access = AdminApiAccess {
            api_url: mock.url(),
            access_token: "syt_admin".to_string(),
        };
        let http = reqwest::Client::new();

        let err = AdminClient::new(&http, &access)
            .auth_providers("@bob:example.org")
            .await
            .unwrap_err();

        match err {
            ApiError::MissingField { field, body, .. } => {
                assert_eq!(field, "external_ids[].auth_provider");
                assert_eq!(body["external_ids"], json!([{"external_id": "bob"}]));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_keeps_status() {
        // Promises more bytes than it sends, then hangs up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"name\"")
                .await;
        });

        let settings = test_settings(&format!("http://{}", addr), false);
        let http = reqwest::Client::new();
        let err = RegistrationClient::new(&http, &settings)
            .create_token("2026-10-26")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::UnreadableBody { .. }));
        assert_eq!(err.status(), Some(StatusCode::OK));
        assert!(crate::message::generate_failed(&err)
            .body
            .starts_with("Uh oh! I got a 200 response"));
    }

    #[tokio::test]
    async fn test_auth_providers_missing_external_ids() {
        let mock = MockApi::start().await;
        mock.respond(
            Method::GET,
            "/_synapse/admin/v2/users/@bob:example.org",
            200,
            r#"{"name":"@bob:example.org"}"#,
        );
        let access = AdminApiAccess {
            api_url: mock.url(),
            access_token: "syt_admin".to_string(),
        };
        let http = reqwest::Client::new();

        let err = AdminClient::new(&http, &access)
            .auth_providers("@bob:example.org")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::MissingField {
                field: "external_ids",
                ..
            }
        ));
    }
}
