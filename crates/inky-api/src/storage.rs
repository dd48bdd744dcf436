//! S3-compatible object-store read client.
//!
//! Fetches image payloads referenced by display commands. The store is
//! unconfigured until the registration handshake delivers credentials;
//! [`configure`](ImageStore::configure) may be called again later and
//! simply overwrites them. Only the GET-object path is implemented —
//! requests are signed locally with AWS Signature V4.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Semaphore;

use crate::error::Error;
use crate::messages::RegistrationResponse;

/// Concurrent fetch limit. Deliberate: the device has one display and
/// a slow uplink, so two in-flight fetches is plenty.
const FETCH_CONCURRENCY: usize = 2;

/// Region advertised in the signature scope. MinIO's default.
const REGION: &str = "us-east-1";

// ── Credentials ──────────────────────────────────────────────────────

/// Read-only object-store credentials, delivered by the registration
/// response (or pre-seeded from configuration).
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    /// Host or host:port, no scheme.
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: SecretString,
    /// Use HTTPS when talking to the endpoint.
    pub secure: bool,
}

impl From<&RegistrationResponse> for StoreCredentials {
    fn from(response: &RegistrationResponse) -> Self {
        Self {
            endpoint: response.minio_endpoint.clone(),
            bucket: response.minio_bucket.clone(),
            access_key: response.minio_access_key.clone(),
            secret_key: SecretString::from(response.minio_secret_key.clone()),
            secure: response.minio_secure,
        }
    }
}

// ── ImageStore ───────────────────────────────────────────────────────

/// Client for fetching images from the content store.
///
/// Credentials live in an [`ArcSwapOption`]: written (rarely) by the
/// registration path, read lock-free on every fetch. The registration
/// signal's happens-before edge makes the single write visible to all
/// subsequent readers.
pub struct ImageStore {
    http: reqwest::Client,
    credentials: ArcSwapOption<StoreCredentials>,
    fetch_gate: Arc<Semaphore>,
}

impl Default for ImageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStore {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials: ArcSwapOption::from(None),
            fetch_gate: Arc::new(Semaphore::new(FETCH_CONCURRENCY)),
        }
    }

    /// Install (or overwrite) credentials. Typically called once, when
    /// the registration response arrives.
    pub fn configure(&self, credentials: StoreCredentials) {
        tracing::info!(
            endpoint = %credentials.endpoint,
            bucket = %credentials.bucket,
            "object store configured"
        );
        self.credentials.store(Some(Arc::new(credentials)));
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.load().is_some()
    }

    /// Fetch an object and decode it as an image.
    ///
    /// Fails with [`Error::StoreNotConfigured`] before registration and
    /// [`Error::Storage`] on any transport, HTTP, or decode failure.
    pub async fn fetch_image(&self, object_path: &str) -> Result<DynamicImage, Error> {
        let credentials = self
            .credentials
            .load_full()
            .ok_or(Error::StoreNotConfigured)?;

        let _permit = self
            .fetch_gate
            .acquire()
            .await
            .map_err(|_| Error::Storage {
                message: "fetch pool closed".into(),
            })?;

        let scheme = if credentials.secure { "https" } else { "http" };
        let canonical_uri = format!(
            "/{}/{}",
            sign::uri_encode(&credentials.bucket),
            sign::uri_encode(object_path)
        );
        let url = format!("{scheme}://{}{canonical_uri}", credentials.endpoint);

        tracing::debug!(bucket = %credentials.bucket, path = object_path, "fetching image");

        let headers = sign::sign_get(&credentials, &canonical_uri, Utc::now())?;
        let response = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("GET {object_path}: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage {
                message: format!("GET {object_path}: HTTP {status}"),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::Storage {
            message: format!("reading {object_path}: {e}"),
        })?;

        // Decode off the async runtime; large PNGs take a while.
        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| Error::Storage {
                message: format!("image decode task failed: {e}"),
            })?
            .map_err(|e| Error::Storage {
                message: format!("decoding {object_path}: {e}"),
            })?;

        tracing::debug!(
            path = object_path,
            width = decoded.width(),
            height = decoded.height(),
            "fetched image"
        );
        Ok(decoded)
    }
}

// ── AWS Signature V4 (GET-object only) ───────────────────────────────

mod sign {
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    use super::*;

    const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
    const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

    /// Build the signed header set for a GET on `canonical_uri`.
    pub(super) fn sign_get(
        credentials: &StoreCredentials,
        canonical_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<HeaderMap, Error> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{REGION}/s3/aws4_request");

        let canonical_request = format!(
            "GET\n{canonical_uri}\n\nhost:{}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}",
            credentials.endpoint
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );

        let key = signing_key(
            credentials.secret_key.expose_secret(),
            &date,
            REGION,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            credentials.access_key
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amz-content-sha256",
            HeaderValue::from_static(UNSIGNED_PAYLOAD),
        );
        headers.insert(
            "x-amz-date",
            HeaderValue::from_str(&amz_date).map_err(|e| Error::Storage {
                message: format!("building request headers: {e}"),
            })?,
        );
        headers.insert(
            "authorization",
            HeaderValue::from_str(&authorization).map_err(|e| Error::Storage {
                message: format!("building request headers: {e}"),
            })?,
        );
        Ok(headers)
    }

    /// Percent-encode a path, keeping `/` as the segment separator.
    /// S3 wants every byte outside the unreserved set encoded.
    pub(super) fn uri_encode(path: &str) -> String {
        let mut out = String::with_capacity(path.len());
        for byte in path.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                    out.push(byte as char);
                }
                _ => out.push_str(&format!("%{byte:02X}")),
            }
        }
        out
    }

    pub(super) fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
        let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
        let k_region = hmac_sha256(&k_date, region.as_bytes());
        let k_service = hmac_sha256(&k_region, service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }

    fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key)
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn hex_sha256(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[cfg(test)]
    mod tests {
        use pretty_assertions::assert_eq;

        use super::*;

        // The worked key-derivation example from the AWS SigV4 docs.
        #[test]
        fn signing_key_matches_aws_reference_vector() {
            let key = signing_key(
                "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
                "20120215",
                "us-east-1",
                "iam",
            );
            assert_eq!(
                hex::encode(key),
                "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
            );
        }

        #[test]
        fn uri_encode_escapes_outside_unreserved_set() {
            assert_eq!(uri_encode("photos/a b.png"), "photos/a%20b.png");
            assert_eq!(uri_encode("plain-path_1.PNG"), "plain-path_1.PNG");
            assert_eq!(uri_encode("ümlaut.png"), "%C3%BCmlaut.png");
        }

        #[test]
        fn authorization_header_has_expected_shape() {
            let credentials = StoreCredentials {
                endpoint: "minio.local:9000".into(),
                bucket: "inky-images".into(),
                access_key: "AKIDEXAMPLE".into(),
                secret_key: SecretString::from("secret"),
                secure: false,
            };
            let now = DateTime::parse_from_rfc3339("2026-02-10T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc);

            let headers = sign_get(&credentials, "/inky-images/a.png", now).unwrap();

            let auth = headers["authorization"].to_str().unwrap();
            assert!(auth.starts_with(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260210/us-east-1/s3/aws4_request"
            ));
            assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
            assert_eq!(headers["x-amz-date"], "20260210T120000Z");
            assert_eq!(headers["x-amz-content-sha256"], "UNSIGNED-PAYLOAD");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn credentials_for(server: &MockServer) -> StoreCredentials {
        let endpoint = server
            .uri()
            .strip_prefix("http://")
            .map(str::to_owned)
            .unwrap_or_else(|| server.uri());

        StoreCredentials {
            endpoint,
            bucket: "inky-images".into(),
            access_key: "test-access-key".into(),
            secret_key: SecretString::from("test-secret-key"),
            secure: false,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let frame = image::RgbImage::from_pixel(width, height, image::Rgb([180, 40, 40]));
        let mut cursor = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(frame)
            .write_to(&mut cursor, image::ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[tokio::test]
    async fn fetch_fails_before_configuration() {
        let store = ImageStore::new();
        assert!(!store.is_configured());

        let err = store.fetch_image("a.png").await.unwrap_err();
        assert!(matches!(err, Error::StoreNotConfigured));
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn fetch_decodes_signed_get() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inky-images/photos/sunset.png"))
            .and(header("x-amz-content-sha256", "UNSIGNED-PAYLOAD"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(32, 24)))
            .mount(&server)
            .await;

        let store = ImageStore::new();
        store.configure(credentials_for(&server));
        assert!(store.is_configured());

        let image = store.fetch_image("photos/sunset.png").await.unwrap();
        assert_eq!((image.width(), image.height()), (32, 24));
    }

    #[tokio::test]
    async fn fetch_surfaces_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inky-images/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = ImageStore::new();
        store.configure(credentials_for(&server));

        let err = store.fetch_image("missing.png").await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn fetch_surfaces_decode_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inky-images/broken.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not an image".to_vec()))
            .mount(&server)
            .await;

        let store = ImageStore::new();
        store.configure(credentials_for(&server));

        let err = store.fetch_image("broken.png").await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[tokio::test]
    async fn reconfiguration_overwrites_credentials() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/inky-images/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(4, 4)))
            .mount(&server)
            .await;

        let store = ImageStore::new();
        store.configure(StoreCredentials {
            endpoint: "unreachable.invalid:9000".into(),
            bucket: "inky-images".into(),
            access_key: "stale".into(),
            secret_key: SecretString::from("stale"),
            secure: false,
        });
        store.configure(credentials_for(&server));

        assert!(store.fetch_image("a.png").await.is_ok());
    }
}
