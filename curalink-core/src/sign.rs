//! Outbound request signing.
//!
//! Every request carries the same identification header set: content
//! negotiation, API key, and device identity. Authenticated requests
//! add a bearer token, and when a shared secret is configured the body
//! is signed with HMAC-SHA256 so the backend can reject tampered or
//! replayed payloads.
//!
//! The signature covers the exact bytes handed to this module; callers
//! serialize a payload once and send the same buffer they signed.

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use sha2::Sha256;
use std::sync::Arc;

use crate::config::ApiConfig;
use crate::error::NetworkError;
use crate::store::Secret;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const DEVICE_MODEL_HEADER: &str = "x-device-model";
pub const OS_VERSION_HEADER: &str = "x-os-version";
pub const APP_VERSION_HEADER: &str = "x-app-version";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-app-signature";

/// Builds the complete header set for outbound requests.
#[derive(Clone)]
pub struct RequestSigner {
    config: Arc<ApiConfig>,
}

impl RequestSigner {
    pub fn new(config: Arc<ApiConfig>) -> Self {
        Self { config }
    }

    /// Hex HMAC-SHA256 signature for a body at a timestamp.
    ///
    /// The MAC input is the body bytes, a literal `.`, and the decimal
    /// unix timestamp in seconds.
    pub fn compute_signature(secret: &Secret, body: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.expose().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(body);
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Header set for one outbound request.
    ///
    /// `bearer` is the `Authorization` value the session layer resolved
    /// for this request. It is passed in rather than looked up here, so
    /// the token in the headers is exactly the one the caller decided
    /// to send.
    pub fn build_headers(
        &self,
        content_type: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> Result<HeaderMap, NetworkError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, value(content_type)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(API_KEY_HEADER, value(&self.config.api_key)?);

        let device = &self.config.device;
        headers.insert(DEVICE_ID_HEADER, value(&device.device_id)?);
        headers.insert(DEVICE_MODEL_HEADER, value(&device.model)?);
        headers.insert(OS_VERSION_HEADER, value(&device.os_version)?);
        headers.insert(APP_VERSION_HEADER, value(&device.app_version)?);

        if let Some(bearer) = bearer {
            headers.insert(AUTHORIZATION, value(bearer)?);
        }

        if let Some(secret) = &self.config.signing_secret {
            let timestamp = Utc::now().timestamp();
            let signature = Self::compute_signature(secret, body, timestamp);
            headers.insert(TIMESTAMP_HEADER, value(&timestamp.to_string())?);
            headers.insert(SIGNATURE_HEADER, value(&signature)?);
        }

        Ok(headers)
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("signing_enabled", &self.config.signing_secret.is_some())
            .finish()
    }
}

fn value(raw: &str) -> Result<HeaderValue, NetworkError> {
    HeaderValue::from_str(raw)
        .map_err(|e| NetworkError::InvalidRequest(format!("header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceIdentity;
    use url::Url;

    fn signer(signing_secret: Option<&str>) -> RequestSigner {
        let mut config = ApiConfig::new(
            Url::parse("https://api.curalink.example").unwrap(),
            "test-api-key",
            DeviceIdentity {
                device_id: "device-1".to_string(),
                model: "pixel-9".to_string(),
                os_version: "15".to_string(),
                app_version: "2.4.0".to_string(),
            },
        );
        if let Some(secret) = signing_secret {
            config = config.with_signing_secret(secret);
        }
        RequestSigner::new(Arc::new(config))
    }

    #[test]
    fn test_signature_is_deterministic() {
        let secret = Secret::new("shared");
        let a = RequestSigner::compute_signature(&secret, br#"{"k":1}"#, 1_700_000_000);
        let b = RequestSigner::compute_signature(&secret, br#"{"k":1}"#, 1_700_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_is_lowercase_hex_sha256_sized() {
        let secret = Secret::new("shared");
        let sig = RequestSigner::compute_signature(&secret, b"{}", 1_700_000_000);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let secret = Secret::new("shared");
        let base = RequestSigner::compute_signature(&secret, b"body", 100);
        assert_ne!(
            base,
            RequestSigner::compute_signature(&secret, b"bodY", 100)
        );
        assert_ne!(base, RequestSigner::compute_signature(&secret, b"body", 101));
        assert_ne!(
            base,
            RequestSigner::compute_signature(&Secret::new("other"), b"body", 100)
        );
    }

    #[test]
    fn test_headers_carry_identity_set() {
        let headers = signer(None)
            .build_headers("application/json", None, b"")
            .unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "test-api-key");
        assert_eq!(headers.get(DEVICE_ID_HEADER).unwrap(), "device-1");
        assert_eq!(headers.get(DEVICE_MODEL_HEADER).unwrap(), "pixel-9");
        assert_eq!(headers.get(OS_VERSION_HEADER).unwrap(), "15");
        assert_eq!(headers.get(APP_VERSION_HEADER).unwrap(), "2.4.0");
    }

    #[test]
    fn test_bearer_included_only_when_present() {
        let signer = signer(None);
        let without = signer.build_headers("application/json", None, b"").unwrap();
        assert!(without.get(AUTHORIZATION).is_none());

        let with = signer
            .build_headers("application/json", Some("Bearer abc"), b"")
            .unwrap();
        assert_eq!(with.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_signature_headers_require_configured_secret() {
        let unsigned = signer(None)
            .build_headers("application/json", None, b"{}")
            .unwrap();
        assert!(unsigned.get(TIMESTAMP_HEADER).is_none());
        assert!(unsigned.get(SIGNATURE_HEADER).is_none());

        let signed = signer(Some("shared"))
            .build_headers("application/json", None, b"{}")
            .unwrap();
        let timestamp: i64 = signed
            .get(TIMESTAMP_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let expected = RequestSigner::compute_signature(&Secret::new("shared"), b"{}", timestamp);
        assert_eq!(signed.get(SIGNATURE_HEADER).unwrap(), expected.as_str());
    }
}
