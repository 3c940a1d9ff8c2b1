use livedvr::{locator::ManifestLocator, DvrError, HttpClient};
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{init_test_tracing, AssertWrapper, DvrMock};

fn watch_page(manifest_url: &str) -> String {
    let escaped = manifest_url.replace('/', r"\/");
    format!(r#"<script>var data = "{{\"streamingData\":{{\"dashManifestUrl\":\"{escaped}\"}}}}";</script>"#)
}

#[tokio::test]
async fn test_locate_escaped_manifest() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let manifest_url = format!("{}/api/manifest/dash/id/1", server.uri());
    server
        .mock("/watch", watch_page(&manifest_url))
        .await
        .mock("/api/manifest/dash/id/1", "<MPD/>")
        .await;

    let locator = ManifestLocator::new(HttpClient::default());
    let manifest = locator
        .locate(&format!("{}/watch", server.uri()))
        .await
        .assert_success();
    assert_eq!(manifest, "<MPD/>");
    Ok(())
}

#[tokio::test]
async fn test_locate_passes_consent_once() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let consent_url = format!("{}/consent", server.uri());
    let manifest_url = format!("{}/manifest", server.uri());

    let consent_page = format!(
        r#"<html><form action="{consent_url}" method="POST">
            <input type="hidden" name="gl" value="DE">
            <input type="hidden" name="continue" value="watch">
        </form></html>"#
    );
    Mock::given(method("GET"))
        .and(path("/watch"))
        .respond_with(ResponseTemplate::new(200).set_body_string(consent_page))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    server
        .mock("/watch", watch_page(&manifest_url))
        .await
        .mock("/manifest", "<MPD/>")
        .await;
    Mock::given(method("POST"))
        .and(path("/consent"))
        .and(body_string_contains("gl=DE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let locator = ManifestLocator::new(HttpClient::default()).with_consent_url(consent_url);
    let manifest = locator.locate(&format!("{}/watch", server.uri())).await?;
    assert_eq!(manifest, "<MPD/>");
    Ok(())
}

#[tokio::test]
async fn test_consent_is_retried_only_once() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let consent_url = format!("{}/consent", server.uri());
    let consent_page = format!(
        r#"<form action="{consent_url}"><input type="hidden" name="gl" value="DE"></form>"#
    );
    server.mock("/watch", consent_page).await;
    Mock::given(method("POST"))
        .and(path("/consent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let locator = ManifestLocator::new(HttpClient::default()).with_consent_url(consent_url);
    let result = locator.locate(&format!("{}/watch", server.uri())).await;
    assert!(matches!(result, Err(DvrError::ManifestUnavailable)));
    Ok(())
}

#[tokio::test]
async fn test_page_without_manifest() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    server.mock("/watch", "<html>offline</html>").await;

    let locator = ManifestLocator::new(HttpClient::default());
    locator
        .locate(&format!("{}/watch", server.uri()))
        .await
        .assert_error();
    Ok(())
}
