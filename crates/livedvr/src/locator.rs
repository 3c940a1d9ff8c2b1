use std::sync::LazyLock;

use regex::Regex;

use crate::{DvrError, DvrResult, HttpClient};

pub const CONSENT_URL: &str = "https://consent.youtube.com/s";

static FORM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<form\b([^>]*)>(.*?)</form>"#).unwrap());
static INPUT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<input\b([^>]*)>"#).unwrap());
static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Finds the manifest behind a broadcast page.
pub struct ManifestLocator {
    client: HttpClient,
    consent_url: String,
}

impl ManifestLocator {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            consent_url: CONSENT_URL.to_string(),
        }
    }

    /// Overrides the consent endpoint the page form is matched against.
    pub fn with_consent_url(mut self, consent_url: impl Into<String>) -> Self {
        self.consent_url = consent_url.into();
        self
    }

    /// Fetches `page_url` and returns the text of the manifest it references.
    ///
    /// A page showing a consent wall is accepted once and fetched again.
    pub async fn locate(&self, page_url: &str) -> DvrResult<String> {
        let page_url = url::Url::parse(page_url)?;

        let mut consent_sent = false;
        loop {
            let page = self.client.get_text(page_url.clone()).await?;
            if let Some(manifest_url) = find_manifest_url(&page) {
                tracing::debug!("Found manifest at {manifest_url}");
                return self.client.get_text(manifest_url.as_str()).await;
            }

            if consent_sent {
                break;
            }
            let Some(form) = find_consent_form(&page, &self.consent_url) else {
                break;
            };

            tracing::info!("Consent check detected. Will try to pass...");
            self.client
                .send(self.client.post(&self.consent_url).form(&form))
                .await?;
            consent_sent = true;
        }

        Err(DvrError::ManifestUnavailable)
    }
}

/// Extracts the last `dashManifestUrl` value, JSON-escaped first, then plain.
pub fn find_manifest_url(page: &str) -> Option<String> {
    const ESCAPED: &str = r#"dashManifestUrl\":\""#;
    const PLAIN: &str = r#"dashManifestUrl":""#;

    let value = if let Some((_, tail)) = page.rsplit_once(ESCAPED) {
        tail.split(r#"\""#).next()?
    } else if let Some((_, tail)) = page.rsplit_once(PLAIN) {
        tail.split('"').next()?
    } else {
        return None;
    };

    let value = value.replace(r"\/", "/");
    (!value.is_empty()).then_some(value)
}

fn attributes(tag: &str) -> impl Iterator<Item = (String, String)> + '_ {
    ATTRIBUTE_REGEX.captures_iter(tag).map(|captures| {
        let name = captures[1].to_ascii_lowercase();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        (name, value)
    })
}

/// Hidden inputs of the form posting to `action`, in document order.
pub fn find_consent_form(page: &str, action: &str) -> Option<Vec<(String, String)>> {
    let body = FORM_REGEX.captures_iter(page).find_map(|form| {
        attributes(form.get(1)?.as_str())
            .any(|(name, value)| name == "action" && value == action)
            .then(|| form.get(2).map(|m| m.as_str()))
            .flatten()
    })?;

    let fields = INPUT_REGEX
        .captures_iter(body)
        .filter_map(|input| {
            let mut kind = None;
            let mut name = None;
            let mut value = String::new();
            for (key, v) in attributes(input.get(1)?.as_str()) {
                match key.as_str() {
                    "type" => kind = Some(v.to_ascii_lowercase()),
                    "name" => name = Some(v),
                    "value" => value = v,
                    _ => {}
                }
            }
            (kind.as_deref() == Some("hidden")).then_some((name?, value))
        })
        .collect();
    Some(fields)
}
