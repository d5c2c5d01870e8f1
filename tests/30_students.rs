mod common;

use anyhow::Result;
use common::start_server;
use reqwest::StatusCode;
use serde_json::json;

async fn student(server: &common::TestServer, first: &str, last: &str, email: &str, major: &str) -> Result<i64> {
    server
        .create("students", json!({"first_name": first, "last_name": last, "email": email, "major": major}))
        .await
}

#[tokio::test]
async fn test_student_listing_filters() -> Result<()> {
    let server = start_server().await?;
    student(&server, "Luis", "Mora", "luis@example.com", "Math").await?;
    student(&server, "Ana", "Beltran", "ana@example.com", "Physics").await?;
    let hidden = student(&server, "Rosa", "Campos", "rosa@example.com", "Math").await?;

    let (status, _) = server.delete(&format!("/students/{}", hidden)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, list) = server.get("/students").await?;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = list
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|s| s["last_name"].as_str())
        .collect();
    assert_eq!(names, vec!["Beltran", "Mora"], "ordered by last name, hidden rows excluded");

    let (status, list) = server.get("/students?major=Math").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let (status, list) = server.get("/students?q=ana").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["first_name"], "Ana");

    let (status, list) = server.get("/students?limit=1&offset=1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));
    assert_eq!(list[0]["last_name"], "Mora");

    let (status, body) = server.get("/students?limit=0").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "zero limit rejected: {}", body);

    Ok(())
}

#[tokio::test]
async fn test_student_email_unique_across_disabled_rows() -> Result<()> {
    let server = start_server().await?;
    let id = student(&server, "Luis", "Mora", "luis@example.com", "Math").await?;

    let (status, body) = server
        .post("/students", json!({"first_name": "L", "last_name": "M", "email": "luis@example.com"}))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["detail"], "duplicate");

    let (status, _) = server.delete(&format!("/students/{}", id)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = server
        .post("/students", json!({"first_name": "L", "last_name": "M", "email": "luis@example.com"}))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "disabled rows still hold their email");

    Ok(())
}

#[tokio::test]
async fn test_student_replace_update() -> Result<()> {
    let server = start_server().await?;
    let id = student(&server, "Luis", "Mora", "luis@example.com", "Math").await?;

    let (status, body) = server
        .put(
            &format!("/students/{}", id),
            json!({"first_name": "Luis", "last_name": "Mora", "email": "luis.mora@example.com"}),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "replace: {}", body);
    assert_eq!(body["email"], "luis.mora@example.com");
    assert_eq!(body["major"], serde_json::Value::Null, "replace clears omitted fields");

    let (status, body) = server
        .put(&format!("/students/{}", id), json!({"first_name": "Luis"}))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "replace requires every required field");
    assert_eq!(body["detail"], "missing-field");

    Ok(())
}
