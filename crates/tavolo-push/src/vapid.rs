//! VAPID request signing (RFC 8292).
//!
//! Builds the short-lived ES256 JWT that identifies this sender to the
//! push service, and the `Authorization: vapid t=<jwt>,k=<key>` header
//! value carried by every delivery request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde::Deserialize;
use tavolo_types::{PushError, VapidConfig};
use url::Url;

/// JWT lifetime. Push services reject tokens expiring more than 24 hours
/// out; we issue half that.
const JWT_TTL_SECS: u64 = 12 * 60 * 60;

/// The subset of an EC JWK needed to import the signing key.
#[derive(Debug, Deserialize)]
struct EcJwk {
    kty: String,
    crv: String,
    d: String,
}

/// Signs VAPID JWTs with the configured P-256 key.
///
/// Constructed once at startup and shared read-only across all
/// dispatches; any import failure is a deployment error, not retryable.
#[derive(Debug)]
pub struct VapidSigner {
    signing_key: SigningKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// Import the signing key from configuration.
    pub fn from_config(config: &VapidConfig) -> Result<Self, PushError> {
        let jwk: EcJwk = serde_json::from_str(&config.private_key_jwk)
            .map_err(|_| PushError::Config("VAPID_PRIVATE_KEY must be in JWK format".into()))?;

        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(PushError::Config(format!(
                "VAPID private key must be an EC P-256 JWK, got kty={:?} crv={:?}",
                jwk.kty, jwk.crv
            )));
        }

        let d = URL_SAFE_NO_PAD.decode(&jwk.d).map_err(|e| {
            PushError::Config(format!("VAPID private key scalar is not valid base64url: {e}"))
        })?;
        if d.len() != 32 {
            return Err(PushError::Config(format!(
                "VAPID private key scalar must be 32 bytes, got {}",
                d.len()
            )));
        }

        let signing_key = SigningKey::from_bytes(d.as_slice().into())
            .map_err(|e| PushError::Config(format!("invalid VAPID private key: {e}")))?;

        Ok(Self {
            signing_key,
            public_key: config.public_key.clone(),
            subject: config.subject.clone(),
        })
    }

    /// Derive the push-service audience (scheme + host) from a
    /// subscription endpoint URL.
    pub fn audience_of(endpoint: &str) -> Result<String, PushError> {
        let url = Url::parse(endpoint)
            .map_err(|e| PushError::Delivery(format!("invalid endpoint URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| PushError::Delivery("endpoint URL has no host".into()))?;
        Ok(format!("{}://{}", url.scheme(), host))
    }

    /// Build a signed compact JWT for the given audience, expiring at
    /// `exp` (seconds since the Unix epoch).
    ///
    /// All three segments are base64url without padding. The signature is
    /// ECDSA P-256/SHA-256 over the UTF-8 bytes of `header.payload`,
    /// emitted as the raw 64-byte `r || s` concatenation, not DER.
    pub fn sign_jwt(&self, audience: &str, exp: u64) -> Result<String, PushError> {
        let header = serde_json::json!({"typ": "JWT", "alg": "ES256"});
        let claims = serde_json::json!({
            "aud": audience,
            "exp": exp,
            "sub": self.subject,
        });

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| PushError::Crypto(format!("JWT header encode failed: {e}")))?;
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| PushError::Crypto(format!("JWT claims encode failed: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );

        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());

        Ok(format!("{signing_input}.{sig_b64}"))
    }

    /// Build the `Authorization` header value for a delivery to
    /// `endpoint`, with the JWT expiring [`JWT_TTL_SECS`] from `now`.
    pub fn authorization_header(
        &self,
        endpoint: &str,
        now_epoch_secs: u64,
    ) -> Result<String, PushError> {
        let audience = Self::audience_of(endpoint)?;
        let jwt = self.sign_jwt(&audience, now_epoch_secs + JWT_TTL_SECS)?;
        Ok(format!("vapid t={jwt},k={}", self.public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;
    use rand::rngs::OsRng;

    /// Build a `VapidConfig` around a freshly generated P-256 key.
    fn test_config(signing_key: &SigningKey) -> VapidConfig {
        let d = URL_SAFE_NO_PAD.encode(signing_key.to_bytes());
        let public_point = signing_key.verifying_key().to_encoded_point(false);
        VapidConfig {
            subject: "mailto:orders@tavolo.example".into(),
            public_key: URL_SAFE_NO_PAD.encode(public_point.as_bytes()),
            private_key_jwk: format!(r#"{{"kty":"EC","crv":"P-256","d":"{d}"}}"#),
        }
    }

    #[test]
    fn rejects_non_json_private_key() {
        let config = VapidConfig {
            subject: "mailto:orders@tavolo.example".into(),
            public_key: String::new(),
            private_key_jwk: "BDef-not-json".into(),
        };
        let err = VapidSigner::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("VAPID_PRIVATE_KEY must be in JWK format"));
    }

    #[test]
    fn rejects_wrong_curve() {
        let config = VapidConfig {
            subject: "mailto:orders@tavolo.example".into(),
            public_key: String::new(),
            private_key_jwk: r#"{"kty":"EC","crv":"P-384","d":"AAAA"}"#.into(),
        };
        let err = VapidSigner::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("P-256"));
    }

    #[test]
    fn rejects_short_scalar() {
        let d = URL_SAFE_NO_PAD.encode([0xAAu8; 16]);
        let config = VapidConfig {
            subject: "mailto:orders@tavolo.example".into(),
            public_key: String::new(),
            private_key_jwk: format!(r#"{{"kty":"EC","crv":"P-256","d":"{d}"}}"#),
        };
        let err = VapidSigner::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn jwt_has_three_unpadded_segments() {
        let key = SigningKey::random(&mut OsRng);
        let signer = VapidSigner::from_config(&test_config(&key)).unwrap();

        let jwt = signer.sign_jwt("https://fcm.googleapis.com", 1_900_000_000).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(!jwt.contains('='));
    }

    #[test]
    fn jwt_header_and_claims_decode() {
        let key = SigningKey::random(&mut OsRng);
        let signer = VapidSigner::from_config(&test_config(&key)).unwrap();

        let jwt = signer.sign_jwt("https://fcm.googleapis.com", 1_900_000_000).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["typ"], "JWT");
        assert_eq!(header["alg"], "ES256");

        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://fcm.googleapis.com");
        assert_eq!(claims["exp"], 1_900_000_000u64);
        assert_eq!(claims["sub"], "mailto:orders@tavolo.example");
        assert_eq!(claims.as_object().unwrap().len(), 3);
    }

    #[test]
    fn jwt_signature_verifies_with_public_key() {
        let key = SigningKey::random(&mut OsRng);
        let signer = VapidSigner::from_config(&test_config(&key)).unwrap();

        let jwt = signer.sign_jwt("https://updates.push.services.mozilla.com", 1_900_000_000).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();

        let sig_bytes = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        assert_eq!(sig_bytes.len(), 64);

        let signature = Signature::from_slice(&sig_bytes).unwrap();
        let verifying_key = VerifyingKey::from(&key);
        let signing_input = format!("{}.{}", parts[0], parts[1]);
        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .expect("ES256 signature must verify");
    }

    #[test]
    fn audience_strips_path_and_query() {
        let audience =
            VapidSigner::audience_of("https://fcm.googleapis.com/fcm/send/abc123?x=1").unwrap();
        assert_eq!(audience, "https://fcm.googleapis.com");
    }

    #[test]
    fn audience_rejects_garbage() {
        assert!(VapidSigner::audience_of("not a url").is_err());
    }

    #[test]
    fn authorization_header_format() {
        let key = SigningKey::random(&mut OsRng);
        let config = test_config(&key);
        let signer = VapidSigner::from_config(&config).unwrap();

        let header = signer
            .authorization_header("https://fcm.googleapis.com/fcm/send/abc", 1_800_000_000)
            .unwrap();
        assert!(header.starts_with("vapid t="));
        assert!(header.ends_with(&format!(",k={}", config.public_key)));

        // The JWT expiry is exactly twelve hours from `now`.
        let jwt = header
            .strip_prefix("vapid t=")
            .unwrap()
            .split(',')
            .next()
            .unwrap();
        let claims: serde_json::Value = serde_json::from_slice(
            &URL_SAFE_NO_PAD.decode(jwt.split('.').nth(1).unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(claims["exp"].as_u64().unwrap(), 1_800_000_000 + 12 * 60 * 60);
    }
}
