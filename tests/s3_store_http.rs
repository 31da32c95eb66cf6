//! Exercises [`git_remote_s3::store::s3::S3Store`] against a real HTTP
//! server standing in for an S3-compatible endpoint, the same technique the
//! teacher uses (`httptest::Server`) to verify its own HTTP-backed adapter
//! without a live backend — here pointed at `S3_ENDPOINT_URL` instead of a
//! git HTTP remote.

use git_remote_s3::store::{s3::S3Store, ObjectStore};
use httptest::{matchers::request, responders::status_code, Expectation, Server};
use serial_test::serial;

fn set_fake_credentials(endpoint: &str) {
    std::env::set_var("AWS_ACCESS_KEY_ID", "test-access-key");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test-secret-key");
    std::env::set_var("AWS_REGION", "us-east-1");
    std::env::set_var("S3_ENDPOINT_URL", endpoint);
}

fn clear_fake_credentials() {
    std::env::remove_var("AWS_ACCESS_KEY_ID");
    std::env::remove_var("AWS_SECRET_ACCESS_KEY");
    std::env::remove_var("AWS_REGION");
    std::env::remove_var("S3_ENDPOINT_URL");
}

const EMPTY_LIST_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>test-bucket</Name>
  <Prefix></Prefix>
  <KeyCount>0</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
</ListBucketResult>"#;

#[tokio::test]
#[serial]
async fn test_connect_probes_bucket_with_list_objects() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/test-bucket/"))
            .times(1..)
            .respond_with(status_code(200).body(EMPTY_LIST_BODY)),
    );

    set_fake_credentials(&server.url("").to_string());
    let store = S3Store::connect("test-bucket", None)
        .await
        .expect("connect should succeed against the mock endpoint");
    clear_fake_credentials();

    let objects = store.list("").await.unwrap();
    assert!(objects.is_empty());
}

#[tokio::test]
#[serial]
async fn test_list_returns_keys_from_mocked_response() {
    let server = Server::run();
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>test-bucket</Name>
  <Prefix>refs/heads/main/</Prefix>
  <KeyCount>1</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>refs/heads/main/c1050000000000000000000000000000000000aa.bundle</Key>
    <LastModified>2026-01-01T00:00:00.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>1234</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
</ListBucketResult>"#;

    server.expect(
        Expectation::matching(request::method_path("GET", "/test-bucket/"))
            .times(1..)
            .respond_with(status_code(200).body(body)),
    );

    set_fake_credentials(&server.url("").to_string());
    let store = S3Store::connect("test-bucket", None).await.unwrap();
    let objects = store.list("refs/heads/main/").await.unwrap();
    clear_fake_credentials();

    assert_eq!(objects.len(), 1);
    assert!(objects[0]
        .key
        .ends_with("c1050000000000000000000000000000000000aa.bundle"));
}
