//! REST remote client over `reqwest`.

use super::RemoteClient;
use crate::{error::Result, Error, Record, RecordId, RemoteMethod, TableName};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;

/// Placeholder replaced by the record id in a route path.
pub const ID_PLACEHOLDER: &str = "{id}";

/// One HTTP endpoint: a method plus a path relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// The path with `{id}` substituted.
    pub fn path_for(&self, id: Option<RecordId>) -> String {
        match id {
            Some(id) => self.path.replace(ID_PLACEHOLDER, &id.to_string()),
            None => self.path.clone(),
        }
    }
}

/// Endpoints for each remote call. `None` means the call is not
/// configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routes {
    pub fetch: Route,
    pub insert: Option<Route>,
    pub update: Option<Route>,
    pub delete: Option<Route>,
}

impl Routes {
    /// Conventional REST layout: `GET|POST {collection}` and
    /// `PUT|DELETE {collection}/{id}`.
    pub fn rest(collection: &str) -> Self {
        let collection = collection.trim_end_matches('/');
        let item = format!("{collection}/{ID_PLACEHOLDER}");
        Self {
            fetch: Route::new(Method::GET, collection),
            insert: Some(Route::new(Method::POST, collection)),
            update: Some(Route::new(Method::PUT, item.clone())),
            delete: Some(Route::new(Method::DELETE, item)),
        }
    }

    /// Only a fetch endpoint.
    pub fn fetch_only(fetch: Route) -> Self {
        Self {
            fetch,
            insert: None,
            update: None,
            delete: None,
        }
    }

    pub fn without_update(mut self) -> Self {
        self.update = None;
        self
    }

    pub fn without_delete(mut self) -> Self {
        self.delete = None;
        self
    }
}

/// A [`RemoteClient`] that speaks JSON over HTTP.
///
/// Insert and update expect the stored record back. A `204 No Content`
/// response carries no payload, which is only acceptable for delete.
#[derive(Debug, Clone)]
pub struct HttpRemote<R: Record> {
    table: TableName,
    base_url: String,
    routes: Routes,
    client: reqwest::Client,
    token: Option<String>,
    timeout: Option<Duration>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> HttpRemote<R> {
    pub fn new(table: impl Into<TableName>, base_url: impl Into<String>, routes: Routes) -> Self {
        Self {
            table: table.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            routes,
            client: reqwest::Client::new(),
            token: None,
            timeout: None,
            _record: PhantomData,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Reuse an existing client (connection pool, proxies, TLS setup).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    fn route(&self, method: RemoteMethod) -> Result<&Route> {
        let route = match method {
            RemoteMethod::Fetch => Some(&self.routes.fetch),
            RemoteMethod::Insert => self.routes.insert.as_ref(),
            RemoteMethod::Update => self.routes.update.as_ref(),
            RemoteMethod::Delete => self.routes.delete.as_ref(),
        };
        route.ok_or_else(|| Error::CapabilityNotConfigured {
            table: self.table.clone(),
            method,
        })
    }

    /// Issue one request. Returns the body text, or `None` for 204.
    async fn send(
        &self,
        method: RemoteMethod,
        id: Option<RecordId>,
        body: Option<&R>,
    ) -> Result<(String, Option<String>)> {
        let route = self.route(method)?;
        let path = route.path_for(id);
        let transport = |message: String| Error::Transport {
            path: path.clone(),
            message,
        };

        let mut request = self
            .client
            .request(route.method.clone(), format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(table = %self.table, %method, %path, "remote request");
        let response = request.send().await.map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(transport(format!("status {status}: {text}")));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok((path, None));
        }

        let text = response.text().await.map_err(|e| transport(e.to_string()))?;
        Ok((path, Some(text)))
    }

    async fn send_for<T: DeserializeOwned>(
        &self,
        method: RemoteMethod,
        id: Option<RecordId>,
        body: Option<&R>,
    ) -> Result<T> {
        let (path, text) = self.send(method, id, body).await?;
        let text = text.ok_or_else(|| Error::Decode {
            path: path.clone(),
            message: "expected a payload, got 204 No Content".into(),
        })?;
        decode(&path, &text)
    }
}

fn decode<T: DeserializeOwned>(path: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Decode {
        path: path.to_string(),
        message: format!("{e}; body: {text}"),
    })
}

#[async_trait]
impl<R: Record> RemoteClient<R> for HttpRemote<R> {
    fn table(&self) -> &str {
        &self.table
    }

    async fn fetch(&self) -> Result<Vec<R>> {
        self.send_for(RemoteMethod::Fetch, None, None).await
    }

    fn can_insert(&self) -> bool {
        self.routes.insert.is_some()
    }

    fn can_update(&self) -> bool {
        self.routes.update.is_some()
    }

    fn can_delete(&self) -> bool {
        self.routes.delete.is_some()
    }

    async fn insert(&self, record: &R) -> Result<R> {
        self.send_for(RemoteMethod::Insert, Some(record.id()), Some(record))
            .await
    }

    async fn update(&self, record: &R) -> Result<R> {
        self.send_for(RemoteMethod::Update, Some(record.id()), Some(record))
            .await
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        self.send(RemoteMethod::Delete, Some(id), None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnDef, ColumnType};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: RecordId,
        body: String,
    }

    impl Record for Note {
        fn id(&self) -> RecordId {
            self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }

        fn columns() -> Vec<ColumnDef> {
            vec![ColumnDef::required("body", ColumnType::Text)]
        }
    }

    #[test]
    fn rest_routes() {
        let routes = Routes::rest("/tables/notes/records/");
        assert_eq!(routes.fetch, Route::new(Method::GET, "/tables/notes/records"));
        assert_eq!(
            routes.update.as_ref().map(|r| r.path_for(Some(7))),
            Some("/tables/notes/records/7".to_string())
        );
        assert_eq!(
            routes.delete.as_ref().map(|r| r.method.clone()),
            Some(Method::DELETE)
        );
    }

    #[test]
    fn capabilities_follow_routes() {
        let remote: HttpRemote<Note> = HttpRemote::new(
            "notes",
            "http://localhost:1/",
            Routes::rest("/notes").without_update(),
        );
        assert!(remote.can_insert());
        assert!(!remote.can_update());
        assert!(remote.can_delete());

        let fetch_only: HttpRemote<Note> = HttpRemote::new(
            "notes",
            "http://localhost:1",
            Routes::fetch_only(Route::new(Method::GET, "/notes")),
        );
        assert!(!fetch_only.can_insert());
        assert!(!fetch_only.can_delete());
    }

    #[tokio::test]
    async fn unconfigured_call_fails_before_any_request() {
        let remote: HttpRemote<Note> = HttpRemote::new(
            "notes",
            "http://localhost:1",
            Routes::rest("/notes").without_delete(),
        );
        assert_eq!(
            remote.delete(3).await,
            Err(Error::CapabilityNotConfigured {
                table: "notes".into(),
                method: RemoteMethod::Delete,
            })
        );
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error_with_path() {
        let remote: HttpRemote<Note> =
            HttpRemote::new("notes", "http://127.0.0.1:9", Routes::rest("/notes"))
                .with_timeout(Duration::from_millis(500));
        match remote.fetch().await {
            Err(Error::Transport { path, .. }) => assert_eq!(path, "/notes"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn decode_failure_carries_body() {
        let err = decode::<Vec<Note>>("/notes", "not json").unwrap_err();
        match err {
            Error::Decode { path, message } => {
                assert_eq!(path, "/notes");
                assert!(message.contains("not json"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
