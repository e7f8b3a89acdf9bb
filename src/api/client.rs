//! REST plumbing for the remote registry and the analysis service.
//!
//! ここは薄い層に保つ。リトライや劣化の判断は ModelStore / AnalysisClient
//! 側の責務で、この層はステータス検査とJSON変換だけを行う。

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::analysis::{Analysis, AnalysisResponse, AnalysisTransport, FramePayload};
use crate::config::{ApiConfig, Platform};
use crate::error::{AnalysisError, ApiError, ModelError};
use crate::model::{ListModelsResponse, ModelFetcher, ModelMetadata};

use super::auth::ApiAuth;

/// `POST /videos` のリクエストボディ
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoRequest {
    pub source: String,
    pub domain: String,
    pub activity: String,
    pub inference: String,
    pub resolution_width: f64,
    pub resolution_height: f64,
}

#[derive(Debug, Deserialize)]
struct CreateVideoResponse {
    id: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    platform: Platform,
    auth: Box<dyn ApiAuth>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, auth: Box<dyn ApiAuth>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            platform: config.platform,
            auth,
        }
    }

    /// レジストリから設定プラットフォーム向けの最新モデル一覧を取得する
    pub async fn list_models(&self) -> Result<Vec<ModelMetadata>, ApiError> {
        let url = format!("{}/mlmodels/ondevice", self.base_url);
        let request = self.auth.apply(self.http.get(&url));
        let response = check_status(request.send().await?).await?;
        let models: ListModelsResponse = response.json().await?;
        Ok(match self.platform {
            Platform::Ios => models.ios,
            Platform::Android => models.android,
        })
    }

    /// アーカイブを `dest` へダウンロードする
    pub async fn download_file(&self, uri: &Url, dest: &Path) -> Result<(), ApiError> {
        let response = check_status(self.http.get(uri.clone()).send().await?).await?;
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    /// 新しいビデオセッションを作成し、そのIDを返す
    pub async fn create_video(&self, request: &CreateVideoRequest) -> Result<String, ApiError> {
        let url = format!("{}/videos", self.base_url);
        let builder = self.auth.apply(self.http.post(&url).json(request));
        let response = check_status(builder.send().await?).await?;
        let body: CreateVideoResponse = response.json().await?;
        Ok(body.id)
    }

    /// フレームバッチで分析を更新し、計算済みの結果を受け取る
    pub async fn patch_analysis(
        &self,
        video_id: &str,
        frames: &[FramePayload],
    ) -> Result<Analysis, ApiError> {
        let url = format!("{}/videos/{}/j2p", self.base_url, video_id);
        let builder = self.auth.apply(self.http.patch(&url).json(frames));
        let response = check_status(builder.send().await?).await?;
        let body: AnalysisResponse = response.json().await?;
        Ok(body.into())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ModelFetcher for ApiClient {
    async fn list_models(&self) -> Result<Vec<ModelMetadata>, ModelError> {
        ApiClient::list_models(self).await.map_err(ModelError::from)
    }

    async fn download(&self, uri: &Url, dest: &Path) -> Result<(), ModelError> {
        self.download_file(uri, dest).await.map_err(ModelError::from)
    }
}

#[async_trait]
impl AnalysisTransport for ApiClient {
    async fn patch_analysis(
        &self,
        video_id: &str,
        frames: &[FramePayload],
    ) -> Result<Analysis, AnalysisError> {
        ApiClient::patch_analysis(self, video_id, frames)
            .await
            .map_err(AnalysisError::from)
    }
}
