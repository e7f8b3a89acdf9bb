//! On-device model lifecycle: discovery, download, extraction, caching.
//!
//! 解決はモデルタイプごとに single-flight かつ成功結果をプロセス内で
//! メモ化する。レジストリ不達時はキャッシュ済みの旧モデルへ劣化する。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::error::ModelError;

use super::cache::{self, MODEL_EXTENSION};

/// ダウンロード済みアーティファクトが担う論理機能
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Pose,
    Person,
}

impl ModelType {
    /// キャッシュのサブディレクトリ名にも使う
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pose => "pose",
            Self::Person => "person",
        }
    }
}

/// リモートレジストリが報告する最新モデルの記述子
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: ModelType,
    pub model_uri: Url,
}

/// `GET /mlmodels/ondevice` のレスポンス（プラットフォーム別リスト）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListModelsResponse {
    #[serde(rename = "iOS", default)]
    pub ios: Vec<ModelMetadata>,
    #[serde(default)]
    pub android: Vec<ModelMetadata>,
}

/// レジストリ照会とアーティファクト転送の注入点
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelMetadata>, ModelError>;

    /// `uri` のアーカイブを `dest` へ転送する
    async fn download(&self, uri: &Url, dest: &Path) -> Result<(), ModelError>;
}

/// モデルタイプごとに使用可能なローカルアーティファクトのパスを生成する
pub struct ModelStore<F: ModelFetcher> {
    fetcher: F,
    root: PathBuf,
    // タイプごとに1回だけ解決する。OnceCell が single-flight を保証し、
    // 同時要求は進行中の解決結果を待つ。失敗はメモ化されず再試行可能。
    resolved: Mutex<HashMap<ModelType, Arc<OnceCell<PathBuf>>>>,
}

impl<F: ModelFetcher> ModelStore<F> {
    pub fn new(fetcher: F, cache_root: PathBuf) -> Self {
        Self {
            fetcher,
            root: cache_root,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// 指定タイプのモデルアーティファクトのローカルパスを返す
    ///
    /// 初回呼び出しで解決（レジストリ照会→キャッシュ照合→必要なら
    /// ダウンロード・展開・インストール）し、以後はメモ化した結果を返す。
    pub async fn get_model(&self, model_type: ModelType) -> Result<PathBuf, ModelError> {
        let cell = {
            let mut resolved = self.resolved.lock().await;
            Arc::clone(resolved.entry(model_type).or_default())
        };
        cell.get_or_try_init(|| self.resolve(model_type))
            .await
            .cloned()
    }

    async fn resolve(&self, model_type: ModelType) -> Result<PathBuf, ModelError> {
        let type_dir = self.root.join(model_type.as_str());
        let cached = cache::list_cached(&type_dir);

        let metadata = match self.fetcher.list_models().await {
            Ok(models) => models.into_iter().find(|m| m.model_type == model_type),
            Err(err) => {
                tracing::warn!(
                    model_type = model_type.as_str(),
                    error = %err,
                    "failed to query model registry"
                );
                None
            }
        };

        let Some(metadata) = metadata else {
            // レジストリ不達または該当タイプ未掲載: キャッシュ済み旧モデルへ劣化
            return match cached.first() {
                Some(fallback) => {
                    tracing::warn!(
                        model_type = model_type.as_str(),
                        path = %fallback.local_path.display(),
                        "falling back to previously cached model"
                    );
                    Ok(fallback.local_path.clone())
                }
                None => Err(ModelError::DownloadFailed(format!(
                    "no registry metadata and no cached {} model",
                    model_type.as_str()
                ))),
            };
        };

        if let Some(hit) = cached.iter().find(|m| m.model_id == metadata.model_id) {
            return Ok(hit.local_path.clone());
        }

        self.download_and_install(&metadata, &type_dir).await
    }

    async fn download_and_install(
        &self,
        metadata: &ModelMetadata,
        type_dir: &Path,
    ) -> Result<PathBuf, ModelError> {
        std::fs::create_dir_all(type_dir)
            .map_err(|e| ModelError::DownloadFailed(format!("cannot create cache dir: {e}")))?;

        // ステージングはキャッシュと同一ファイルシステムに置き、
        // 最後のrenameがアトミックになるようにする。途中で失敗しても
        // 不完全なアーティファクトがキャッシュから見えることはない。
        let staging = tempfile::tempdir_in(&self.root)
            .map_err(|e| ModelError::DownloadFailed(format!("cannot create staging dir: {e}")))?;
        let archive_path = staging.path().join("model.zip");
        self.fetcher.download(&metadata.model_uri, &archive_path).await?;

        let extract_dir = staging.path().join("extracted");
        let package = {
            let archive_path = archive_path.clone();
            let extract_dir = extract_dir.clone();
            tokio::task::spawn_blocking(move || {
                cache::extract_model_archive(&archive_path, &extract_dir)
            })
            .await
            .map_err(|e| ModelError::CompileFailed(format!("extraction task failed: {e}")))??
        };

        let dest = type_dir.join(format!("{}.{}", metadata.model_id, MODEL_EXTENSION));
        std::fs::rename(&package, &dest)
            .map_err(|e| ModelError::CompileFailed(format!("cannot install model: {e}")))?;

        tracing::info!(
            model_id = metadata.model_id.as_str(),
            path = %dest.display(),
            "model installed"
        );
        Ok(dest)
    }
}
