use thiserror::Error;

/// モデル解決の失敗
#[derive(Debug, Error)]
pub enum ModelError {
    /// レジストリ照会またはアーティファクト転送の失敗（ローカルフォールバックも無い場合）
    #[error("model download failed: {0}")]
    DownloadFailed(String),
    /// アーティファクトは存在するがロード/コンパイルできない
    #[error("model compile failed: {0}")]
    CompileFailed(String),
}

/// 単一フレームの推論失敗（パイプラインは継続する）
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("pose model invocation failed: {0}")]
    ModelFailed(String),
    /// モデル出力に非有限値が含まれる等
    #[error("pose model returned malformed output: {0}")]
    MalformedOutput(String),
}

/// 分析サービスへのディスパッチ失敗
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Transport(String),
    #[error("analysis update rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    /// バッファロックまたはフラッシュフラグが確保できなかった
    #[error("analysis buffer is busy")]
    Busy,
}

/// REST プラミング層のエラー。トレイト境界でドメインエラーに変換される。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for ModelError {
    fn from(err: ApiError) -> Self {
        ModelError::DownloadFailed(err.to_string())
    }
}

impl From<ApiError> for AnalysisError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => AnalysisError::Rejected { status, body },
            other => AnalysisError::Transport(other.to_string()),
        }
    }
}
