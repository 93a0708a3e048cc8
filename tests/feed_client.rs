use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::{DELETE, GET, PATCH, POST};
use httpmock::MockServer;
use serde_json::{Value, json};
use social_feed_client::{
    ApiClient, ClientError, FeedClient, Fetcher, FileStore, IdentityStore, MemoryStore,
};
use tempfile::tempdir;

fn client_with_store(base_url: &str, store: Arc<dyn IdentityStore>) -> FeedClient {
    let fetcher = Fetcher::new("test-agent", Duration::from_secs(5), 4, None).unwrap();
    let api = ApiClient::parse(base_url, fetcher).unwrap();
    FeedClient::new(api, store)
}

fn client_for(server: &MockServer) -> FeedClient {
    client_with_store(&server.base_url(), Arc::new(MemoryStore::new()))
}

fn post_json(id: &str, username: &str, content: &str, likes: u64) -> Value {
    json!({
        "id": id,
        "username": username,
        "content": content,
        "likesCount": likes,
        "commentsCount": 0,
        "createdAt": "2026-01-30T00:00:00Z",
        "updatedAt": "2026-01-30T00:00:00Z"
    })
}

fn comment_json(id: &str, post_id: &str, username: &str, content: &str) -> Value {
    json!({
        "id": id,
        "postId": post_id,
        "username": username,
        "content": content,
        "createdAt": "2026-01-30T00:00:00Z",
        "updatedAt": "2026-01-30T00:00:00Z"
    })
}

fn ids(client: &FeedClient) -> Vec<String> {
    client.posts().iter().map(|p| p.id.clone()).collect()
}

#[tokio::test]
async fn refresh_replaces_snapshot_and_failure_keeps_it() {
    let server = MockServer::start_async().await;
    let mut list = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200).json_body(json!([
                post_json("p1", "alice", "one", 0),
                post_json("p2", "bob", "two", 3),
            ]));
        })
        .await;

    let client = client_for(&server);
    let posts = client.refresh_feed().await.unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(ids(&client), vec!["p1", "p2"]);
    let snap = client.snapshot();
    assert!(snap.api_up);
    assert!(snap.last_error.is_none());
    assert!(snap.refreshed_at.is_some());

    list.delete_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(500).json_body(json!({"message": "boom"}));
        })
        .await;

    let err = client.refresh_feed().await.unwrap_err();
    assert_eq!(
        err,
        ClientError::RequestFailed {
            status: 500,
            message: "boom".to_string()
        }
    );
    let after = client.snapshot();
    assert!(Arc::ptr_eq(&after.posts, &snap.posts));
    assert!(!after.api_up);
    assert_eq!(after.last_error, Some(err));

    failing.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p3", "carol", "three", 0)]));
        })
        .await;

    client.refresh_feed().await.unwrap();
    assert_eq!(ids(&client), vec!["p3"]);
    assert!(client.api_up());
    assert!(client.last_error().is_none());
}

#[tokio::test]
async fn duplicate_posts_are_kept_in_server_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200).json_body(json!([
                post_json("b", "bob", "same", 0),
                post_json("a", "alice", "same", 0),
                post_json("b", "bob", "same", 0),
            ]));
        })
        .await;

    let client = client_for(&server);
    client.refresh_feed().await.unwrap();
    assert_eq!(ids(&client), vec!["b", "a", "b"]);
}

#[tokio::test]
async fn unreachable_backend_marks_api_down() {
    let client = client_with_store("http://127.0.0.1:1", Arc::new(MemoryStore::new()));
    let err = client.refresh_feed().await.unwrap_err();
    assert!(matches!(err, ClientError::NetworkUnreachable(_)), "{err:?}");
    assert!(!client.api_up());
    assert!(client.posts().is_empty());
    assert!(client.last_error().unwrap().is_network());
}

#[tokio::test]
async fn blank_identity_leaves_identity_unset() {
    let store = Arc::new(MemoryStore::new());
    let client = client_with_store("http://localhost:8000", store.clone());

    for raw in ["", "   "] {
        assert!(matches!(
            client.set_identity(raw),
            Err(ClientError::ValidationFailed(_))
        ));
    }
    assert!(client.identity().is_none());
    assert_eq!(store.get("username").unwrap(), None);
}

#[tokio::test]
async fn identity_is_fixed_until_cleared() {
    let client = client_with_store("http://localhost:8000", Arc::new(MemoryStore::new()));
    assert_eq!(client.set_identity(" alice ").unwrap().as_str(), "alice");
    assert!(client.set_identity("alice").is_ok());
    assert!(matches!(
        client.set_identity("bob"),
        Err(ClientError::ValidationFailed(_))
    ));
    assert_eq!(client.identity().unwrap().as_str(), "alice");

    assert_eq!(client.clear_identity().unwrap().as_str(), "alice");
    assert_eq!(client.set_identity("bob").unwrap().as_str(), "bob");
}

#[tokio::test]
async fn identity_survives_client_reload() {
    let tmp = tempdir().unwrap();
    let state = tmp.path().join("state.json");

    let first = client_with_store("http://localhost:8000", Arc::new(FileStore::new(&state)));
    first.set_identity("  alice  ").unwrap();
    drop(first);

    let second = client_with_store("http://localhost:8000", Arc::new(FileStore::new(&state)));
    assert_eq!(second.identity().unwrap().as_str(), "alice");
    second.clear_identity();

    let third = client_with_store("http://localhost:8000", Arc::new(FileStore::new(&state)));
    assert!(third.identity().is_none());
}

#[tokio::test]
async fn identity_persists_over_truncated_state_file() {
    let tmp = tempdir().unwrap();
    let state = tmp.path().join("state.json");
    std::fs::write(&state, r#"{"username":"al"#).unwrap();

    let first = client_with_store("http://localhost:8000", Arc::new(FileStore::new(&state)));
    assert!(first.identity().is_none());
    first.set_identity("alice").unwrap();
    drop(first);

    let second = client_with_store("http://localhost:8000", Arc::new(FileStore::new(&state)));
    assert_eq!(second.identity().unwrap().as_str(), "alice");
}

#[tokio::test]
async fn mutations_without_identity_never_reach_the_network() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.path_contains("/");
            then.status(200).json_body(json!({}));
        })
        .await;

    let client = client_for(&server);
    let before = client.snapshot();

    let results = vec![
        client.create_post("hello").await.map(|_| ()),
        client.update_post("p1", "hello").await.map(|_| ()),
        client.delete_post("p1").await,
        client.toggle_like("p1", false).await,
        client.create_comment("p1", "hi").await.map(|_| ()),
        client.update_comment("p1", "c1", "hi").await.map(|_| ()),
        client.delete_comment("p1", "c1").await,
    ];
    for res in results {
        assert!(matches!(res, Err(ClientError::ValidationFailed(_))), "{res:?}");
    }

    assert_eq!(any.hits_async().await, 0);
    assert!(Arc::ptr_eq(&client.snapshot().posts, &before.posts));
}

#[tokio::test]
async fn blank_or_oversized_content_is_rejected_locally() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/posts");
            then.status(201).json_body(post_json("p1", "alice", "x", 0));
        })
        .await;
    let comment = server
        .mock_async(|when, then| {
            when.method(POST).path("/posts/p1/comments");
            then.status(201)
                .json_body(comment_json("c1", "p1", "alice", "x"));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();

    for content in ["", " ", "\n\t"] {
        assert!(matches!(
            client.create_post(content).await,
            Err(ClientError::ValidationFailed(_))
        ));
    }
    let too_long = "x".repeat(social_feed_client::MAX_POST_CHARS + 1);
    assert!(matches!(
        client.create_post(&too_long).await,
        Err(ClientError::ValidationFailed(_))
    ));
    let long_comment = "x".repeat(social_feed_client::MAX_COMMENT_CHARS + 1);
    assert!(matches!(
        client.create_comment("p1", &long_comment).await,
        Err(ClientError::ValidationFailed(_))
    ));

    assert_eq!(create.hits_async().await, 0);
    assert_eq!(comment.hits_async().await, 0);
}

#[tokio::test]
async fn created_post_shows_up_after_refresh() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/posts")
                .header("x-username", "alice")
                .json_body(json!({"username": "alice", "content": "hello"}));
            then.status(201)
                .json_body(post_json("p1", "alice", "hello", 0));
        })
        .await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "alice", "hello", 0)]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();
    let post = client.create_post("  hello  ").await.unwrap();
    assert_eq!(post.id, "p1");

    create.assert_async().await;
    list.assert_async().await;

    let posts = client.posts();
    let p1 = posts.iter().find(|p| p.id == "p1").unwrap();
    assert_eq!(p1.username, "alice");
    assert_eq!(p1.content, "hello");
}

#[tokio::test]
async fn update_post_round_trips_through_refresh() {
    let server = MockServer::start_async().await;
    let update = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/posts/p1")
                .json_body(json!({"username": "alice", "content": "new text"}));
            then.status(200)
                .json_body(post_json("p1", "alice", "new text", 0));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "alice", "new text", 0)]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();
    let updated = client.update_post("p1", "new text").await.unwrap();
    assert_eq!(updated.content, "new text");
    update.assert_async().await;

    let posts = client.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].content, "new text");
}

#[tokio::test]
async fn server_refusal_is_propagated_without_refresh() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/posts/p1");
            then.status(403)
                .json_body(json!({"error": "FORBIDDEN", "message": "Only the author can edit"}));
        })
        .await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200).json_body(json!([]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("mallory").unwrap();
    let err = client.update_post("p1", "hijack").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(
        err,
        ClientError::RequestFailed {
            status: 403,
            message: "Only the author can edit".to_string()
        }
    );
    assert_eq!(list.hits_async().await, 0);
    // The feed's reachability is only judged by refreshes.
    assert!(client.api_up());
}

#[tokio::test]
async fn delete_post_sends_escaped_identity_header_and_tolerates_204() {
    let server = MockServer::start_async().await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/posts/p1")
                .header("x-username", "alice%20smith");
            then.status(204).header("content-type", "application/json");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200).json_body(json!([]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice smith").unwrap();
    client.delete_post("p1").await.unwrap();
    delete.assert_async().await;
    assert!(client.posts().is_empty());
}

#[tokio::test]
async fn toggle_like_picks_endpoint_and_refreshes() {
    let server = MockServer::start_async().await;
    let like = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/posts/p1/likes")
                .json_body(json!({"username": "alice"}));
            then.status(201).json_body(json!({
                "postId": "p1",
                "username": "alice",
                "likedAt": "2026-01-30T00:00:00Z"
            }));
        })
        .await;
    let unlike = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/posts/p1/likes")
                .header("x-username", "alice");
            then.status(204);
        })
        .await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "bob", "hi", 7)]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();

    client.toggle_like("p1", false).await.unwrap();
    assert_eq!(like.hits_async().await, 1);
    assert_eq!(unlike.hits_async().await, 0);
    assert_eq!(client.posts()[0].likes_count, 7);

    client.toggle_like("p1", true).await.unwrap();
    assert_eq!(like.hits_async().await, 1);
    assert_eq!(unlike.hits_async().await, 1);
    assert_eq!(list.hits_async().await, 2);
}

#[tokio::test]
async fn comment_lifecycle_refreshes_comments_and_feed() {
    let server = MockServer::start_async().await;
    let list_comments = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1/comments");
            then.status(200)
                .json_body(json!([comment_json("c1", "p1", "bob", "first")]));
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/posts/p1/comments")
                .json_body(json!({"username": "alice", "content": "nice"}));
            then.status(201)
                .json_body(comment_json("c2", "p1", "alice", "nice"));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/posts/p1/comments/c2")
                .json_body(json!({"username": "alice", "content": "nicer"}));
            then.status(200)
                .json_body(comment_json("c2", "p1", "alice", "nicer"));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/posts/p1/comments/c2")
                .header("x-username", "alice");
            then.status(204);
        })
        .await;
    let feed = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "bob", "hi", 0)]));
        })
        .await;

    let client = client_for(&server);
    assert!(client.comments("p1").is_none());

    // Reading needs no identity.
    let comments = client.list_comments("p1").await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(client.comments("p1").unwrap()[0].id, "c1");

    client.set_identity("alice").unwrap();
    let created = client.create_comment("p1", " nice ").await.unwrap();
    assert_eq!(created.id, "c2");
    let updated = client.update_comment("p1", "c2", "nicer").await.unwrap();
    assert_eq!(updated.content, "nicer");
    client.delete_comment("p1", "c2").await.unwrap();

    create.assert_async().await;
    update.assert_async().await;
    delete.assert_async().await;
    assert_eq!(list_comments.hits_async().await, 4);
    assert_eq!(feed.hits_async().await, 3);
}

#[tokio::test]
async fn missing_post_reports_detail_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/nope/comments");
            then.status(404).json_body(json!({"detail": "Post not found"}));
        })
        .await;

    let client = client_for(&server);
    let err = client.list_comments("nope").await.unwrap_err();
    assert_eq!(
        err,
        ClientError::RequestFailed {
            status: 404,
            message: "Post not found".to_string()
        }
    );
    assert!(client.comments("nope").is_none());
    assert_eq!(client.comments_error("nope").unwrap().status(), Some(404));
}

#[tokio::test]
async fn failed_comment_refresh_after_create_is_recorded() {
    let server = MockServer::start_async().await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/posts/p1/comments");
            then.status(201)
                .json_body(comment_json("c1", "p1", "alice", "nice"));
        })
        .await;
    let mut list_comments = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1/comments");
            then.status(500).json_body(json!({"message": "boom"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "bob", "hi", 0)]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();
    let created = client.create_comment("p1", "nice").await.unwrap();
    assert_eq!(created.id, "c1");
    create.assert_async().await;

    assert!(client.comments("p1").is_none());
    assert_eq!(
        client.comments_error("p1"),
        Some(ClientError::RequestFailed {
            status: 500,
            message: "boom".to_string()
        })
    );
    assert!(client.api_up());

    list_comments.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1/comments");
            then.status(200)
                .json_body(json!([comment_json("c1", "p1", "alice", "nice")]));
        })
        .await;
    client.list_comments("p1").await.unwrap();
    assert!(client.comments_error("p1").is_none());
    assert_eq!(client.comments("p1").unwrap().len(), 1);
}

#[tokio::test]
async fn delete_after_shutdown_leaves_cached_comments() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1/comments");
            then.status(200)
                .json_body(json!([comment_json("c1", "p1", "bob", "first")]));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/posts/p1");
            then.status(204);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200).json_body(json!([]));
        })
        .await;

    let client = client_for(&server);
    client.set_identity("alice").unwrap();
    client.list_comments("p1").await.unwrap();
    client.shutdown();

    client.delete_post("p1").await.unwrap();
    delete.assert_async().await;
    assert_eq!(client.comments("p1").unwrap()[0].id, "c1");
}

#[tokio::test]
async fn single_post_and_comment_reads() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1");
            then.status(200).json_body(post_json("p1", "bob", "hi", 2));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/p1/comments/c1");
            then.status(200)
                .json_body(comment_json("c1", "p1", "carol", "yo"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts/broken");
            then.status(200).body("not json");
        })
        .await;

    let client = client_for(&server);
    let post = client.get_post("p1").await.unwrap();
    assert_eq!(post.likes_count, 2);
    assert!(client.posts().is_empty());

    let comment = client.get_comment("p1", "c1").await.unwrap();
    assert_eq!(comment.username, "carol");
    assert_eq!(comment.post_id.as_deref(), Some("p1"));

    match client.get_post("broken").await {
        Err(ClientError::RequestFailed { status, message }) => {
            assert_eq!(status, 200);
            assert!(message.starts_with("invalid response body"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn base_url_prefix_is_kept() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/posts");
            then.status(200).json_body(json!([]));
        })
        .await;

    let client = client_with_store(&server.url("/api"), Arc::new(MemoryStore::new()));
    client.refresh_feed().await.unwrap();
    list.assert_async().await;
}

#[tokio::test]
async fn poller_refreshes_until_shutdown() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "alice", "hi", 0)]));
        })
        .await;

    let client = Arc::new(client_for(&server));
    let mut updates = client.subscribe();
    client.start_polling(Duration::from_millis(50));

    tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updates.borrow_and_update().posts[0].id, "p1");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(list.hits_async().await >= 2);
    assert_eq!(ids(&client), vec!["p1"]);

    client.shutdown();
    assert!(client.is_closed());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = list.hits_async().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(list.hits_async().await, settled);
}

#[tokio::test]
async fn responses_after_shutdown_are_not_applied() {
    let server = MockServer::start_async().await;
    let mut first = server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p1", "alice", "hi", 0)]));
        })
        .await;

    let client = client_for(&server);
    client.refresh_feed().await.unwrap();
    client.shutdown();

    first.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/posts");
            then.status(200)
                .json_body(json!([post_json("p2", "bob", "later", 0)]));
        })
        .await;

    let returned = client.refresh_feed().await.unwrap();
    assert_eq!(returned[0].id, "p2");
    assert_eq!(ids(&client), vec!["p1"]);
    assert!(!client.refreshing());
}
