use chrono::{TimeZone, Utc};
use clipcast::error::CoreError;
use clipcast::model::{Credentials, GeneratedArtifact, SelectionResult};
use clipcast::youtube::{Publisher, VideoMetadata, Visibility, YouTubeClient};
use reqwest::Url;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{
    body_partial_json, body_string, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> YouTubeClient {
    let base = Url::parse(&server.uri()).unwrap();
    let token = base.join("token").unwrap();
    YouTubeClient::with_base_url("client-id".into(), "client-secret".into(), base, token).unwrap()
}

fn stored_credentials() -> Credentials {
    Credentials {
        access_token: Some("stale".into()),
        refresh_token: "refresh-1".into(),
        expires_at: None,
    }
}

fn metadata() -> VideoMetadata {
    VideoMetadata {
        title: "Episode 3".into(),
        description: "Beats to study to".into(),
        tags: vec!["lofi".into()],
    }
}

fn artifact(dir: &Path, with_cover: bool) -> GeneratedArtifact {
    let video = dir.join("video.mp4");
    std::fs::write(&video, b"fake mp4 bytes").unwrap();
    let cover_image = with_cover.then(|| {
        let cover = dir.join("cover.jpg");
        std::fs::write(&cover, b"fake jpeg").unwrap();
        cover
    });
    GeneratedArtifact {
        path: video,
        duration: 30.0,
        selection: SelectionResult::default(),
        cover_image,
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_upload(server: &MockServer, expected_status: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .and(query_param("uploadType", "resumable"))
        .and(query_param("part", "snippet,status"))
        .and(header("authorization", "Bearer fresh-token"))
        .and(body_partial_json(json!({
            "snippet": { "title": "Episode 3", "tags": ["lofi"] },
            "status": expected_status
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/upload/session/abc", server.uri()).as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/session/abc"))
        .and(header("authorization", "Bearer fresh-token"))
        .and(header("content-length", "14"))
        .and(body_string("fake mp4 bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "yt123" })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn uploads_public_video_with_thumbnail() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_upload(&server, json!({ "privacyStatus": "public" })).await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/thumbnails/set"))
        .and(query_param("videoId", "yt123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let receipt = client(&server)
        .upload(
            &stored_credentials(),
            &artifact(dir.path(), true),
            &metadata(),
            Visibility::Public,
            None,
        )
        .await
        .unwrap();

    assert_eq!(receipt.remote_id, "yt123");
    assert_eq!(receipt.url, "https://www.youtube.com/watch?v=yt123");
    let refreshed = receipt.refreshed.expect("refreshed credentials");
    assert_eq!(refreshed.access_token.as_deref(), Some("fresh-token"));
    // refresh token not rotated
    assert_eq!(refreshed.refresh_token, "refresh-1");
    assert!(refreshed.expires_at.is_some());
}

#[tokio::test]
async fn scheduled_upload_is_private_until_publish_at() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_upload(
        &server,
        json!({ "privacyStatus": "private", "publishAt": "2024-05-20T04:30:00Z" }),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 5, 20, 4, 30, 0).unwrap();
    let receipt = client(&server)
        .upload(
            &stored_credentials(),
            &artifact(dir.path(), false),
            &metadata(),
            Visibility::Private,
            Some(at),
        )
        .await
        .unwrap();
    assert_eq!(receipt.remote_id, "yt123");
}

#[tokio::test]
async fn revoked_refresh_token_is_a_credentials_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = client(&server)
        .upload(
            &stored_credentials(),
            &artifact(dir.path(), false),
            &metadata(),
            Visibility::Public,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CredentialsInvalid(_)), "{err}");
}

#[tokio::test]
async fn thumbnail_failure_does_not_fail_upload() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_upload(&server, json!({ "privacyStatus": "public" })).await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/thumbnails/set"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let receipt = client(&server)
        .upload(
            &stored_credentials(),
            &artifact(dir.path(), true),
            &metadata(),
            Visibility::Public,
            None,
        )
        .await
        .unwrap();
    assert_eq!(receipt.remote_id, "yt123");
}

#[tokio::test]
async fn upload_rejection_is_reported() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/upload/youtube/v3/videos"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string(r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = client(&server)
        .upload(
            &stored_credentials(),
            &artifact(dir.path(), false),
            &metadata(),
            Visibility::Public,
            None,
        )
        .await
        .unwrap_err();
    match err {
        CoreError::Publication(message) => assert!(message.contains("quotaExceeded")),
        other => panic!("unexpected error: {other}"),
    }
}
