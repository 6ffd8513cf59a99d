use std::time::Duration;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

use crate::{FailureKind, LoadError, LoadedPage};

#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    /// Extra request headers, e.g. an access token for private instances.
    pub headers: Vec<(String, String)>,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 8 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            headers: Vec::new(),
        }
    }
}

/// Supplies the current markup of the monitored page.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<LoadedPage, LoadError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPageSource {
    settings: LoadSettings,
    client: reqwest::Client,
}

impl ReqwestPageSource {
    pub fn new(settings: LoadSettings) -> Result<Self, LoadError> {
        let client = build_client(&settings)?;
        Ok(Self { settings, client })
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    fn too_large(&self, actual: u64) -> LoadError {
        LoadError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "page too large",
        )
    }
}

fn build_client(settings: &LoadSettings) -> Result<reqwest::Client, LoadError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LoadError::new(FailureKind::InvalidHeader, err.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| LoadError::new(FailureKind::InvalidHeader, err.to_string()))?;
        headers.insert(name, value);
    }

    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
        .default_headers(headers)
        .build()
        .map_err(|err| LoadError::new(FailureKind::Network, err.to_string()))
}

#[async_trait::async_trait]
impl PageSource for ReqwestPageSource {
    async fn load(&self, url: &str) -> Result<LoadedPage, LoadError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| LoadError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self.client.get(parsed).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(LoadError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        let (html, encoding_label) = decode_page(&bytes, content_type.as_deref())?;
        Ok(LoadedPage {
            html,
            final_url,
            encoding_label,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> LoadError {
    if err.is_timeout() {
        return LoadError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return LoadError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    LoadError::new(FailureKind::Network, err.to_string())
}

/// Decodes the body: BOM first, then the Content-Type charset, then detection.
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> Result<(String, String), LoadError> {
    let encoding = Encoding::for_bom(bytes)
        .map(|(encoding, _)| encoding)
        .or_else(|| {
            content_type
                .and_then(charset_label)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
        })
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        });

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(LoadError::new(
            FailureKind::Decode {
                encoding: encoding.name().to_string(),
            },
            "malformed byte sequence",
        ));
    }
    Ok((text.into_owned(), encoding.name().to_string()))
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
    })
}
