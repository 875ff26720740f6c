mod support;

use serde_json::{json, Value};

use support::TestServer;

#[tokio::test]
async fn health_reports_live_counters() {
    let server = TestServer::start().await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("health json");

    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["pendingWrites"], 0);
}

#[tokio::test]
async fn register_login_me_logout() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/api/v1/user/new"))
        .multipart(TestServer::register_form("Alice", "alice", "secret"))
        .send()
        .await
        .expect("register");
    assert_eq!(response.status(), 201);
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|value| value.to_str().ok())
        .expect("set-cookie")
        .to_string();
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["user"].get("password").is_none());

    let login: Value = server
        .client
        .post(server.url("/api/v1/user/login"))
        .json(&json!({ "username": "alice", "password": "secret" }))
        .send()
        .await
        .expect("login")
        .json()
        .await
        .expect("login json");
    assert_eq!(login["message"], "Welcome Back, Alice");
    let token = login["token"].as_str().expect("token").to_string();

    let (status, me) = server.get("/api/v1/user/me", &token).await;
    assert_eq!(status, 200);
    assert_eq!(me["user"]["name"], "Alice");

    let (status, _) = server.get("/api/v1/user/logout", &token).await;
    assert_eq!(status, 200);

    let (status, body) = server.get("/api/v1/user/me", &token).await;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "AUTH_REVOKED");
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_unauthorized() {
    let server = TestServer::start().await;
    server.register("Bob", "bob").await;

    let response = server
        .client
        .post(server.url("/api/v1/user/login"))
        .json(&json!({ "username": "bob", "password": "nope" }))
        .send()
        .await
        .expect("login");
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .get(server.url("/api/v1/user/me"))
        .send()
        .await
        .expect("me");
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "AUTH_MISSING");
}

#[tokio::test]
async fn duplicate_username_is_a_conflict() {
    let server = TestServer::start().await;
    server.register("Carol", "carol").await;

    let response = server
        .client
        .post(server.url("/api/v1/user/new"))
        .multipart(TestServer::register_form("Carol Two", "carol", "secret"))
        .send()
        .await
        .expect("register");
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn group_lifecycle_over_http() {
    let server = TestServer::start().await;
    let owner = server.register("Owner", "owner").await;
    let a = server.register("Ann", "ann").await;
    let b = server.register("Ben", "ben").await;

    let created: Value = server
        .client
        .post(server.url("/api/v1/chat/new"))
        .bearer_auth(&owner.token)
        .json(&json!({ "name": "team", "members": [a.id, b.id] }))
        .send()
        .await
        .expect("create group")
        .json()
        .await
        .expect("json");
    let chat_id = created["chat"]["_id"].as_str().expect("chat id").to_string();

    let (status, groups) = server.get("/api/v1/chat/my/groups", &owner.token).await;
    assert_eq!(status, 200);
    assert_eq!(groups["groups"].as_array().map(Vec::len), Some(1));

    // 非创建者不能改名
    let (status, _) = server
        .put(
            &format!("/api/v1/chat/{chat_id}"),
            &a.token,
            json!({ "name": "mine" }),
        )
        .await;
    assert_eq!(status, 403);

    let (status, _) = server
        .put(
            &format!("/api/v1/chat/{chat_id}"),
            &owner.token,
            json!({ "name": "renamed" }),
        )
        .await;
    assert_eq!(status, 200);

    let (status, details) = server
        .get(&format!("/api/v1/chat/{chat_id}?populate=true"), &b.token)
        .await;
    assert_eq!(status, 200);
    assert_eq!(details["chat"]["groupName"], "renamed");

    let response = server
        .client
        .delete(server.url(&format!("/api/v1/chat/leave/{chat_id}")))
        .bearer_auth(&b.token)
        .send()
        .await
        .expect("leave");
    assert_eq!(response.status(), 200);

    // 离开后不再是成员
    let (status, _) = server
        .get(&format!("/api/v1/chat/message/{chat_id}"), &b.token)
        .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn admin_requires_secret_key() {
    let server = TestServer::start().await;
    server.register("Dan", "dan").await;

    let response = server
        .client
        .post(server.url("/api/v1/admin/verify"))
        .json(&json!({ "secretKey": "wrong" }))
        .send()
        .await
        .expect("verify");
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .get(server.url("/api/v1/admin/stats"))
        .send()
        .await
        .expect("stats");
    assert_eq!(response.status(), 401);

    let verified: Value = server
        .client
        .post(server.url("/api/v1/admin/verify"))
        .json(&json!({ "secretKey": "local-admin-secret" }))
        .send()
        .await
        .expect("verify")
        .json()
        .await
        .expect("json");
    let token = verified["token"].as_str().expect("admin token").to_string();

    let (status, stats) = server.get("/api/v1/admin/stats", &token).await;
    assert_eq!(status, 200);
    assert_eq!(stats["stats"]["usersCount"], 1);

    let (status, users) = server.get("/api/v1/admin/users", &token).await;
    assert_eq!(status, 200);
    assert_eq!(users["users"].as_array().map(Vec::len), Some(1));
}
