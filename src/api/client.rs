use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{multipart::Form, Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::api::errors::ApiError;
use crate::api::token::TokenStore;
use crate::core::config::ApiSettings;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// Everything a request needs that would otherwise be global: where the API
/// lives, how to find the bearer token, and what to do on a 401.
#[derive(Clone)]
pub struct ClientContext {
    base_url: String,
    timeout: Duration,
    trailing_slash: bool,
    tokens: Arc<dyn TokenStore>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("trailing_slash", &self.trailing_slash)
            .field("has_token", &self.tokens.load().is_some())
            .finish()
    }
}

impl ClientContext {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            trailing_slash: false,
            tokens,
            on_unauthorized: None,
        }
    }

    pub fn from_settings(settings: &ApiSettings, tokens: Arc<dyn TokenStore>) -> Self {
        Self::new(settings.base_url.as_str(), tokens)
            .with_timeout(settings.timeout())
            .with_trailing_slash(settings.trailing_slash)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append `/` to paths that lack one, matching servers that redirect
    /// slash-less collection routes.
    pub fn with_trailing_slash(mut self, enabled: bool) -> Self {
        self.trailing_slash = enabled;
        self
    }

    pub fn on_unauthorized(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub(crate) fn url(&self, path: &str) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if self.trailing_slash && !url.ends_with('/') && !url.contains('?') {
            url.push('/');
        }
        url
    }

    fn handle_unauthorized(&self) {
        self.tokens.clear();
        if let Some(hook) = &self.on_unauthorized {
            hook();
        }
    }
}

/// Shared HTTP client for the exam backend. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    context: ClientContext,
}

impl ApiClient {
    pub fn new(context: ClientContext) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(context.timeout))
            .timeout(context.timeout)
            .build()
            .map_err(|err| ApiError::Network(format!("failed to build http client: {err}")))?;

        Ok(Self { inner: Arc::new(Inner { http, context }) })
    }

    pub fn context(&self) -> &ClientContext {
        &self.inner.context
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.execute(Method::GET, path, |builder| builder).await?;
        decode(path, &body)
    }

    pub(crate) async fn get_json_with_query<T, Q>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let body = self.execute(Method::GET, path, |builder| builder.query(query)).await?;
        decode(path, &body)
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, payload: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(Method::POST, path, |builder| builder.json(payload)).await?;
        decode(path, &body)
    }

    /// POST whose response body is not relied upon.
    pub(crate) async fn post_json_ack<B>(&self, path: &str, payload: &B) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.execute(Method::POST, path, |builder| builder.json(payload)).await.map(|_| ())
    }

    pub(crate) async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.execute(Method::POST, path, |builder| builder).await?;
        decode(path, &body)
    }

    pub(crate) async fn put_json<B, T>(&self, path: &str, payload: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.execute(Method::PUT, path, |builder| builder.json(payload)).await?;
        decode(path, &body)
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, |builder| builder).await.map(|_| ())
    }

    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let body = self.execute(Method::POST, path, |builder| builder.form(fields)).await?;
        decode(path, &body)
    }

    pub(crate) async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        let body =
            self.execute(Method::POST, path, move |builder| builder.multipart(form)).await?;
        decode(path, &body)
    }

    async fn execute<F>(
        &self,
        method: Method,
        path: &str,
        configure: F,
    ) -> Result<String, ApiError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let context = &self.inner.context;
        let url = context.url(path);

        let mut builder = self.inner.http.request(method.clone(), &url);
        if let Some(token) = context.tokens.load() {
            builder = builder.bearer_auth(token);
        }
        let builder = configure(builder);

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = ApiError::from(err);
                tracing::warn!(method = %method, path, error = %err, "Request failed");
                return Err(err);
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(ApiError::from)?;
        tracing::debug!(
            method = %method,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );

        if status == StatusCode::UNAUTHORIZED {
            tracing::info!(path, "Server rejected the stored token; clearing it");
            context.handle_unauthorized();
        }

        if !status.is_success() {
            return Err(ApiError::from_response(status, &body));
        }

        Ok(body)
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|err| ApiError::Decode(format!("{path}: {err}")))
}
