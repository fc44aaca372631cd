//! One-shot authorized calls against the authorization API.
//!
//! Every request carries the signed token verbatim in `Authorization`.
//! Responses are surfaced as JSON; a body that is not JSON comes back as a
//! JSON string so callers can always print it the same way.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SdkError;

/// Status and decoded body of an authorization API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Decoded body; `Value::Null` when empty.
    pub body: Value,
}

impl ApiResponse {
    /// The API signals success with exactly `200 OK`.
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Thin `reqwest` wrapper for the authorization API.
#[derive(Debug, Clone, Default)]
pub struct AuthApiClient {
    http: reqwest::Client,
}

impl AuthApiClient {
    /// A client with default `reqwest` settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client reusing an existing `reqwest` client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `GET url` with `Authorization: token`.
    pub async fn get(&self, url: &str, token: &str) -> Result<ApiResponse, SdkError> {
        self.send(self.request(Method::GET, url, token)).await
    }

    /// `PUT url` with `Authorization: token` and a JSON body.
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        body: &B,
    ) -> Result<ApiResponse, SdkError> {
        self.send(self.request(Method::PUT, url, token).json(body))
            .await
    }

    fn request(&self, method: Method, url: &str, token: &str) -> reqwest::RequestBuilder {
        debug!(%method, %url, "authorization API request");
        self.http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, token)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse, SdkError> {
        let res = request.send().await?;
        let status = res.status();
        let text = res.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(%status, "authorization API response");
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn put_sends_token_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/users/kid-1"))
            .and(header("Authorization", "signed.token.value"))
            .and(body_json(json!({"jwk_key": {"kty": "RSA"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = AuthApiClient::new();
        let res = client
            .put(
                &format!("{}/users/kid-1", server.uri()),
                "signed.token.value",
                &json!({"jwk_key": {"kty": "RSA"}}),
            )
            .await
            .unwrap();

        assert!(res.is_success());
        assert_eq!(res.body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn non_json_body_is_a_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enterprise"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;

        let res = AuthApiClient::new()
            .get(&format!("{}/enterprise", server.uri()), "tok")
            .await
            .unwrap();

        assert!(!res.is_success());
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.body, Value::String("Forbidden".into()));
    }

    #[tokio::test]
    async fn only_200_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let res = AuthApiClient::new()
            .get(&format!("{}/user", server.uri()), "tok")
            .await
            .unwrap();

        assert!(!res.is_success());
        assert_eq!(res.body, Value::Null);
    }
}
