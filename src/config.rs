use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub region: RegionConfig,
    #[serde(default)]
    pub smooth: SmoothConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// レジストリが配布するアーティファクトのプラットフォーム区分
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    #[serde(rename = "ios")]
    Ios,
    #[serde(rename = "android")]
    Android,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// API ベースURL（末尾スラッシュなし）
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_platform")]
    pub platform: Platform,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelConfig {
    /// モデルキャッシュのルートディレクトリ
    ///
    /// アプリはプロセスをまたいで保持される app-private なディレクトリを
    /// 指定すること。未指定時は一時ディレクトリ（開発・テスト向け）。
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegionConfig {
    /// キーポイント可視判定の信頼度閾値
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    /// 全身BBoxの各軸パディング率
    #[serde(default = "default_padding_factor")]
    pub padding_factor: f64,
    /// 体幹BBoxに掛けるクロップ倍率
    #[serde(default = "default_torso_scale")]
    pub torso_scale: f64,
    /// 全身BBoxに掛けるクロップ倍率
    #[serde(default = "default_body_scale")]
    pub body_scale: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmoothConfig {
    /// 現フレームサンプルに掛けるブレンド重み
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f64,
    /// これ未満のスコアは「データなし」として扱う
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// トークンバケットの補充レート（フレーム/秒）
    #[serde(default = "default_max_per_second")]
    pub max_per_second: f64,
    /// pending バッファ上限（超過分は古い順に破棄）
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// バッファロック取得の待機上限（秒）
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: f64,
}

fn default_base_url() -> String { "https://api.formsight.dev".to_string() }
fn default_platform() -> Platform { Platform::Ios }
fn default_visibility_threshold() -> f64 { 0.1 }
fn default_padding_factor() -> f64 { 0.15 }
fn default_torso_scale() -> f64 { 1.9 }
fn default_body_scale() -> f64 { 1.2 }
fn default_blend_weight() -> f64 { 0.25 }
fn default_min_score() -> f64 { 0.01 }
fn default_max_per_second() -> f64 { 8.0 }
fn default_max_buffer_size() -> usize { 100 }
fn default_lock_timeout_secs() -> f64 { 10.0 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            platform: default_platform(),
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            padding_factor: default_padding_factor(),
            torso_scale: default_torso_scale(),
            body_scale: default_body_scale(),
        }
    }
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            blend_weight: default_blend_weight(),
            min_score: default_min_score(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_per_second: default_max_per_second(),
            max_buffer_size: default_max_buffer_size(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("formsight-models"))
    }
}

impl AnalysisConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lock_timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %err,
                    "failed to load config, using defaults"
                );
                Config::default()
            }
        }
    }
}
