use crate::api::client::ApiClient;
use crate::api::errors::ApiError;
use crate::api::validation::validate_payload;
use crate::schemas::auth::{LoginForm, RegisterRequest, Token, User};

impl ApiClient {
    /// Logs in and keeps the issued token for later requests.
    pub async fn login(&self, form: &LoginForm) -> Result<Token, ApiError> {
        validate_payload(form)?;
        let token: Token = self.post_form("auth/login", &form.as_fields()).await?;
        self.store_token(&token)?;
        tracing::info!(user_id = %token.user.id, "Logged in");
        Ok(token)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Token, ApiError> {
        validate_payload(request)?;
        let token: Token = self.post_json("auth/register", request).await?;
        self.store_token(&token)?;
        tracing::info!(user_id = %token.user.id, "Registered");
        Ok(token)
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.get_json("users/me").await
    }

    pub fn logout(&self) {
        self.context().tokens().clear();
    }

    fn store_token(&self, token: &Token) -> Result<(), ApiError> {
        self.context()
            .tokens()
            .save(&token.access_token)
            .map_err(|err| ApiError::Storage(err.to_string()))
    }
}
