//! Response accumulators the flow handlers write into.

use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

use crate::errors::ProtocolError;
use crate::oidc::types::ResponseMode;

/// Parameters accumulated for the authorize-endpoint redirect
///
/// Several handlers may contribute to one response; each appends its
/// parameters and later handlers may read what earlier ones produced (the
/// ID-token handler hashes the code and access token placed here).
#[derive(Debug, Clone, Default)]
pub struct AuthorizeResponse {
    params: Vec<(String, String)>,
}

impl AuthorizeResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn code(&self) -> Option<&str> {
        self.parameter("code")
    }

    pub fn access_token(&self) -> Option<&str> {
        self.parameter("access_token")
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Render the redirect location, appending parameters as query or
    /// fragment per the response mode
    pub fn redirect_location(
        &self,
        redirect_uri: &str,
        mode: ResponseMode,
    ) -> Result<String, ProtocolError> {
        let mut url = Url::parse(redirect_uri).map_err(|e| {
            ProtocolError::ServerError(format!("validated redirect URI failed to parse: {}", e))
        })?;
        match mode {
            ResponseMode::Query => {
                for (k, v) in &self.params {
                    url.query_pairs_mut().append_pair(k, v);
                }
            }
            ResponseMode::Fragment => {
                let mut fragment = url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in &self.params {
                    fragment.append_pair(k, v);
                }
                url.set_fragment(Some(&fragment.finish()));
            }
        }
        Ok(url.to_string())
    }
}

/// Flat string-keyed data map for token-endpoint responses
#[derive(Debug, Clone, Default)]
pub struct AccessResponse {
    data: BTreeMap<String, Value>,
}

impl AccessResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    pub fn has_access_token(&self) -> bool {
        self.get_str("access_token").is_some()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_location_query_mode() {
        let mut response = AuthorizeResponse::new();
        response.add_parameter("code", "abc");
        response.add_parameter("state", "12345678");

        let location = response
            .redirect_location("https://app.example.com/cb", ResponseMode::Query)
            .unwrap();
        assert!(location.starts_with("https://app.example.com/cb?"));
        assert!(location.contains("code=abc"));
        assert!(location.contains("state=12345678"));
    }

    #[test]
    fn redirect_location_fragment_mode() {
        let mut response = AuthorizeResponse::new();
        response.add_parameter("id_token", "eyJ");
        response.add_parameter("state", "s");

        let location = response
            .redirect_location("https://app.example.com/cb", ResponseMode::Fragment)
            .unwrap();
        let (base, fragment) = location.split_once('#').unwrap();
        assert_eq!(base, "https://app.example.com/cb");
        assert!(fragment.contains("id_token=eyJ"));
        assert!(fragment.contains("state=s"));
    }

    #[test]
    fn access_response_round_trips_json() {
        let mut response = AccessResponse::new();
        response.set("access_token", "tok");
        response.set("expires_in", 3600);
        response.set("token_type", "bearer");

        let json = response.to_json();
        assert_eq!(json["access_token"], "tok");
        assert_eq!(json["expires_in"], 3600);
        assert!(response.has_access_token());
    }
}
