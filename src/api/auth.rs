use reqwest::RequestBuilder;

/// リクエストへの認証ヘッダ適用
///
/// 同じ `RequestBuilder` を返すのでメソッドチェーンできる。
pub trait ApiAuth: Send + Sync {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder;
}

/// `x-api-key` ヘッダによる認証
pub struct ApiKeyAuth {
    api_key: String,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl ApiAuth for ApiKeyAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("x-api-key", &self.api_key)
    }
}

/// Bearer トークンによる認証
pub struct AccessTokenAuth {
    access_token: String,
}

impl AccessTokenAuth {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

impl ApiAuth for AccessTokenAuth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }
}
