//! フレーム推論の蓄積と分析サービスへのディスパッチ
//!
//! フレームレートで届く推論をトークンバケットで間引いて蓄積し、
//! single-flight なフラッシュでまとめて PATCH する。カメラスレッドを
//! 無期限にブロックしないことが最優先: ロックは有界待ち、フラッシュは
//! 競合時に no-op で即座に返る。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pose::FrameInference;

use super::types::{Analysis, FramePayload};

/// 分析サービスへの転送の注入点
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn patch_analysis(
        &self,
        video_id: &str,
        frames: &[FramePayload],
    ) -> Result<Analysis, AnalysisError>;
}

struct BufferState {
    pending: VecDeque<FrameInference>,
    tokens: f64,
    last_replenished: Instant,
}

/// ビデオ/セッションごとに1つ。状態は admission ロックと
/// フラッシュフラグの下でのみ変更される。
pub struct AnalysisClient<T: AnalysisTransport> {
    transport: T,
    video_id: String,
    max_per_second: f64,
    max_buffer_size: usize,
    lock_timeout: Duration,
    state: Mutex<BufferState>,
    flushing: AtomicBool,
}

impl<T: AnalysisTransport> AnalysisClient<T> {
    pub fn new(transport: T, video_id: impl Into<String>, config: &AnalysisConfig) -> Self {
        Self {
            transport,
            video_id: video_id.into(),
            max_per_second: config.max_per_second,
            max_buffer_size: config.max_buffer_size,
            lock_timeout: config.lock_timeout(),
            state: Mutex::new(BufferState {
                pending: VecDeque::new(),
                // 1.0 で開始: セッション最初のフレームは即座に受理される
                tokens: 1.0_f64.min(config.max_per_second),
                last_replenished: Instant::now(),
            }),
            flushing: AtomicBool::new(false),
        }
    }

    /// 推論を受理判定し、バッファが空でなければフラッシュを試みる
    ///
    /// レート制限による不受理はエラーではなく no-op。フラッシュが既に
    /// 進行中の場合も `Ok(None)` を返す（待ちも重複実行もしない）。
    pub async fn add(&self, inference: &FrameInference) -> Result<Option<Analysis>, AnalysisError> {
        match self.admit_at(inference, Instant::now()) {
            Some(true) => self.flush().await,
            // ロックタイムアウト、または受理されず pending も空
            _ => Ok(None),
        }
    }

    /// トークンバケットによる受理判定。`now` を明示的に取るのはテストの
    /// 決定性のため。戻り値はロック取得後の pending 非空フラグ、
    /// ロックが時間内に取れなければ None。
    fn admit_at(&self, inference: &FrameInference, now: Instant) -> Option<bool> {
        let mut state = self.state.try_lock_for(self.lock_timeout)?;

        let elapsed = now.saturating_duration_since(state.last_replenished);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.max_per_second).min(self.max_per_second);
        state.last_replenished = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.pending.push_back(inference.clone());
            // FIFO trim: 落とすのは常に最古
            while state.pending.len() > self.max_buffer_size {
                state.pending.pop_front();
            }
        }

        Some(!state.pending.is_empty())
    }

    /// pending のスナップショットを PATCH する。single-flight:
    /// 既にフラッシュ進行中なら副作用なしで `Ok(None)`。
    ///
    /// 成功時はスナップショット分だけを pending から取り除く
    /// （PATCH 中に追加されたフレームは残る）。失敗時は pending を
    /// 変更せずエラーを返す。リトライは呼び出し側の責務。
    pub async fn flush(&self) -> Result<Option<Analysis>, AnalysisError> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(None);
        }

        let result = self.flush_inner().await;
        self.flushing.store(false, Ordering::Release);
        result.map(Some)
    }

    async fn flush_inner(&self) -> Result<Analysis, AnalysisError> {
        let snapshot: Vec<FrameInference> = {
            let state = self
                .state
                .try_lock_for(self.lock_timeout)
                .ok_or(AnalysisError::Busy)?;
            state.pending.iter().cloned().collect()
        };

        let frames: Vec<FramePayload> = snapshot.iter().map(FramePayload::from_inference).collect();

        let analysis = match self.transport.patch_analysis(&self.video_id, &frames).await {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(video_id = self.video_id.as_str(), error = %err, "analysis flush failed");
                return Err(err);
            }
        };

        if let Some(mut state) = self.state.try_lock_for(self.lock_timeout) {
            let drained = snapshot.len().min(state.pending.len());
            state.pending.drain(..drained);
        }

        Ok(analysis)
    }

    /// admission ロックとフラッシュフラグの両方が空くまで待つ（有界）
    ///
    /// セッション終了時に、進行中の分析を取りこぼさないために使う。
    pub async fn wait_until_quiet(&self) {
        if let Some(guard) = self.state.try_lock_for(self.lock_timeout) {
            drop(guard);
        }
        let deadline = Instant::now() + self.lock_timeout;
        while self.flushing.load(Ordering::Acquire) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}
