//! PostgREST-backed todo store.
//!
//! Requests carry the user's access token so row-level security applies on
//! the server. Lists are additionally filtered by `user_id` so a permissive
//! policy never leaks other users' rows into the cache.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use tracing::debug;

use super::{SupabaseClient, SupabaseError};
use crate::error::StoreError;
use crate::repository::TodoStore;
use crate::types::{Identity, Todo, TodoInsert, TodoPatch};

/// Todo store talking to Supabase's REST API.
#[derive(Debug, Clone)]
pub struct SupabaseTodoStore {
    client: SupabaseClient,
    table: String,
}

impl SupabaseTodoStore {
    /// Creates a store over `table`.
    pub fn new(client: SupabaseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Starts a request against the table on behalf of `identity`.
    fn request(&self, method: Method, identity: &Identity) -> Result<RequestBuilder, StoreError> {
        let token = identity.access_token().ok_or(StoreError::PermissionDenied)?;
        let path = format!("/rest/v1/{}", self.table);
        Ok(self.client.request(method, &path, Some(token)))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
        Ok(self.client.send(request).await?)
    }

    async fn rows(response: reqwest::Response) -> Result<Vec<Todo>, StoreError> {
        Ok(SupabaseClient::json::<Vec<Todo>>(response, "todos").await?)
    }
}

#[async_trait]
impl TodoStore for SupabaseTodoStore {
    async fn select_all(&self, identity: &Identity) -> Result<Vec<Todo>, StoreError> {
        let owner = format!("eq.{}", identity.id);
        let request = self.request(Method::GET, identity)?.query(&[
            ("select", "*"),
            ("user_id", owner.as_str()),
            ("order", "created_at.desc"),
        ]);

        let todos = Self::rows(self.send(request).await?).await?;
        debug!(table = %self.table, count = todos.len(), "Fetched todos");
        Ok(todos)
    }

    async fn insert(&self, identity: &Identity, row: TodoInsert) -> Result<Todo, StoreError> {
        let request = self
            .request(Method::POST, identity)?
            .header("Prefer", "return=representation")
            .json(&row);

        Self::rows(self.send(request).await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StoreError::from(SupabaseError::InvalidResponse(
                    "insert returned no rows".to_string(),
                ))
            })
    }

    async fn update(&self, identity: &Identity, id: &str, patch: TodoPatch) -> Result<(), StoreError> {
        let filter = format!("eq.{id}");
        let request = self
            .request(Method::PATCH, identity)?
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&patch);

        // PostgREST answers 200 with an empty array when the filter matched
        // nothing, which includes rows hidden by row-level security.
        let updated = Self::rows(self.send(request).await?).await?;
        if updated.is_empty() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn delete(&self, identity: &Identity, id: &str) -> Result<(), StoreError> {
        let filter = format!("eq.{id}");
        let request = self
            .request(Method::DELETE, identity)?
            .query(&[("id", filter.as_str())]);

        self.send(request).await?;
        debug!(table = %self.table, todo_id = %id, "Delete request accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_store(mock_server: &MockServer) -> SupabaseTodoStore {
        let client = SupabaseClient::new(mock_server.uri(), "test-anon-key")
            .expect("failed to create test client");
        SupabaseTodoStore::new(client, "todos")
    }

    fn alice() -> Identity {
        Identity::new("alice-id", None).with_access_token("alice-jwt")
    }

    fn row(id: &str, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "content": "",
            "completed": false,
            "image_url": null,
            "created_at": "2024-05-01T12:00:00+00:00",
            "updated_at": null,
            "user_id": "alice-id"
        })
    }

    // ==================== select_all tests ====================

    #[tokio::test]
    async fn select_all_filters_by_owner_and_orders_newest_first() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/todos"))
            .and(query_param("select", "*"))
            .and(query_param("user_id", "eq.alice-id"))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "test-anon-key"))
            .and(header("Authorization", "Bearer alice-jwt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([row("t2", "second"), row("t1", "first")])),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let todos = store.select_all(&alice()).await.expect("list");

        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].id, "t2");
        assert_eq!(todos[1].title, "first");
    }

    #[tokio::test]
    async fn select_all_without_token_is_denied_locally() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let result = store.select_all(&Identity::new("alice-id", None)).await;

        assert_eq!(result, Err(StoreError::PermissionDenied));
    }

    #[tokio::test]
    async fn select_all_maps_401_to_permission_denied() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        assert_eq!(
            store.select_all(&alice()).await,
            Err(StoreError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn select_all_maps_5xx_to_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        assert!(matches!(
            store.select_all(&alice()).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    // ==================== insert tests ====================

    #[tokio::test]
    async fn insert_posts_row_and_returns_representation() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/todos"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(json!({
                "user_id": "alice-id",
                "title": "Buy milk",
                "content": "2%",
                "image_url": null
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([row("t1", "Buy milk")])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let todo = store
            .insert(
                &alice(),
                TodoInsert {
                    user_id: "alice-id".to_string(),
                    title: "Buy milk".to_string(),
                    content: "2%".to_string(),
                    image_url: None,
                },
            )
            .await
            .expect("insert");

        assert_eq!(todo.id, "t1");
        assert!(!todo.completed);
    }

    #[tokio::test]
    async fn insert_rejected_by_policy_is_permission_denied() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": "42501",
                "message": "new row violates row-level security policy for table \"todos\""
            })))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let result = store
            .insert(
                &alice(),
                TodoInsert {
                    user_id: "someone-else".to_string(),
                    title: "x".to_string(),
                    content: String::new(),
                    image_url: None,
                },
            )
            .await;

        assert_eq!(result, Err(StoreError::PermissionDenied));
    }

    // ==================== update tests ====================

    #[tokio::test]
    async fn update_patches_by_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/todos"))
            .and(query_param("id", "eq.t1"))
            .and(body_json(json!({ "completed": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row("t1", "x")])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let patch = TodoPatch {
            completed: Some(true),
            ..TodoPatch::default()
        };

        assert!(store.update(&alice(), "t1", patch).await.is_ok());
    }

    #[tokio::test]
    async fn update_matching_nothing_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        let result = store.update(&alice(), "gone", TodoPatch::default()).await;

        assert_eq!(
            result,
            Err(StoreError::NotFound {
                id: "gone".to_string()
            })
        );
    }

    // ==================== delete tests ====================

    #[tokio::test]
    async fn delete_by_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/todos"))
            .and(query_param("id", "eq.t1"))
            .and(header("Authorization", "Bearer alice-jwt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = create_test_store(&mock_server);
        assert!(store.delete(&alice(), "t1").await.is_ok());
    }

    #[tokio::test]
    async fn delete_timeout_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204).set_delay(std::time::Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::with_timeout(
            mock_server.uri(),
            "test-anon-key",
            std::time::Duration::from_millis(50),
        )
        .unwrap();
        let store = SupabaseTodoStore::new(client, "todos");

        assert!(matches!(
            store.delete(&alice(), "t1").await,
            Err(StoreError::Timeout(_))
        ));
    }
}
