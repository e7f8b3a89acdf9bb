//! フレームごとの推論オーケストレーション
//!
//! 領域推定 → 注入されたポーズモデル → 時間平滑化 を1回の呼び出しに
//! まとめ、結果を分析バッファへ流す。推論は single-flight: 前のフレームの
//! 推論がまだ走っていれば新フレームはキューせず捨てる（リアルタイム性を
//! 完全性より優先する明示的なバックプレッシャ方針）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::analysis::{Analysis, AnalysisClient, AnalysisTransport};
use crate::config::Config;
use crate::error::{AnalysisError, InferenceError};
use crate::pose::{FrameInference, KeypointMap, NormalizedRect, RegionEstimator, TemporalSmoother};

/// カメラ層から渡される1フレーム分の画像（RGB8、行優先）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// 注入されるポーズモデル機能
///
/// 画像とクロップ領域を受け取り、フレーム全体の正規化座標で
/// キーポイントを返す。ニューラルネットワーク本体は外部コラボレータ。
pub trait PoseModel: Send {
    fn infer(
        &mut self,
        frame: &VideoFrame,
        region: NormalizedRect,
    ) -> Result<KeypointMap, InferenceError>;
}

struct FrameState<M> {
    model: M,
    /// 直前に成功したフレームの平滑化済みキーポイント。
    /// 失敗フレームでは更新しない（次の平滑化は最後の成功結果に連なる）。
    last_keypoints: Option<KeypointMap>,
}

/// 1本のビデオ/セッションに対する推論パイプライン
pub struct InferenceSession<M: PoseModel, T: AnalysisTransport> {
    state: Mutex<FrameState<M>>,
    estimator: RegionEstimator,
    smoother: TemporalSmoother,
    frame_index: AtomicU64,
    started_at: Instant,
    finish_timeout: Duration,
    analysis: AnalysisClient<T>,
}

impl<M: PoseModel, T: AnalysisTransport> InferenceSession<M, T> {
    pub fn new(model: M, transport: T, video_id: impl Into<String>, config: &Config) -> Self {
        Self {
            state: Mutex::new(FrameState {
                model,
                last_keypoints: None,
            }),
            estimator: RegionEstimator::from_config(&config.region),
            smoother: TemporalSmoother::from_config(&config.smooth),
            frame_index: AtomicU64::new(0),
            started_at: Instant::now(),
            finish_timeout: config.analysis.lock_timeout(),
            analysis: AnalysisClient::new(transport, video_id, &config.analysis),
        }
    }

    /// 1フレームを処理する
    ///
    /// `Ok(None)` は前の推論が進行中でフレームを捨てたことを意味する。
    /// 捨てたフレームのぶんフレーム番号は飛ぶ（欠番は許容）。
    pub fn process_frame(
        &self,
        frame: &VideoFrame,
    ) -> Result<Option<FrameInference>, InferenceError> {
        let frame_index = self.frame_index.fetch_add(1, Ordering::Relaxed);

        let Some(mut state) = self.state.try_lock() else {
            return Ok(None);
        };

        let region = self.estimator.estimate(state.last_keypoints.as_ref());
        let raw = state.model.infer(frame, region)?;
        validate_keypoints(&raw)?;

        let smoothed = self.smoother.smooth(&raw, state.last_keypoints.as_ref());
        state.last_keypoints = Some(smoothed.clone());

        let timestamp = Instant::now();
        Ok(Some(FrameInference {
            frame_index,
            timestamp,
            seconds_since_start: timestamp.duration_since(self.started_at).as_secs_f64(),
            keypoints: smoothed,
        }))
    }

    /// 推論を分析バッファへ渡す。`Ok(Some)` はフラッシュが走って
    /// 新しい分析結果が得られたとき。
    pub async fn dispatch(
        &self,
        inference: &FrameInference,
    ) -> Result<Option<Analysis>, AnalysisError> {
        self.analysis.add(inference).await
    }

    /// セッション終了: 進行中のフラッシュを待ち、残りを最終フラッシュする
    pub async fn finish(&self) -> Result<Analysis, AnalysisError> {
        self.analysis.wait_until_quiet().await;

        let deadline = Instant::now() + self.finish_timeout;
        loop {
            if let Some(analysis) = self.analysis.flush().await? {
                return Ok(analysis);
            }
            if Instant::now() >= deadline {
                return Err(AnalysisError::Busy);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn analysis(&self) -> &AnalysisClient<T> {
        &self.analysis
    }
}

/// モデル出力の健全性チェック。非有限値はマップに入れない（不変条件）。
fn validate_keypoints(keypoints: &KeypointMap) -> Result<(), InferenceError> {
    for (landmark, kp) in keypoints {
        if !(kp.x.is_finite() && kp.y.is_finite() && kp.score.is_finite()) {
            return Err(InferenceError::MalformedOutput(format!(
                "non-finite keypoint for {}",
                landmark.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisTransport, FramePayload};
    use crate::pose::{Keypoint, Landmark};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    struct NullTransport;

    #[async_trait]
    impl AnalysisTransport for NullTransport {
        async fn patch_analysis(
            &self,
            _video_id: &str,
            _frames: &[FramePayload],
        ) -> Result<Analysis, AnalysisError> {
            Ok(Analysis::default())
        }
    }

    /// 呼び出しごとに決まったキーポイント（またはエラー）を返すモデル
    struct ScriptedModel {
        frames: Vec<Result<KeypointMap, String>>,
        calls: usize,
        seen_regions: Vec<NormalizedRect>,
    }

    impl ScriptedModel {
        fn new(frames: Vec<Result<KeypointMap, String>>) -> Self {
            Self {
                frames,
                calls: 0,
                seen_regions: Vec::new(),
            }
        }
    }

    impl PoseModel for ScriptedModel {
        fn infer(
            &mut self,
            _frame: &VideoFrame,
            region: NormalizedRect,
        ) -> Result<KeypointMap, InferenceError> {
            self.seen_regions.push(region);
            let scripted = self.frames[self.calls.min(self.frames.len() - 1)].clone();
            self.calls += 1;
            scripted.map_err(InferenceError::ModelFailed)
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame {
            width: 4,
            height: 4,
            rgb: vec![0; 4 * 4 * 3],
        }
    }

    fn full_pose(x: f64) -> KeypointMap {
        let mut map = KeypointMap::new();
        for landmark in [
            Landmark::LeftShoulder,
            Landmark::RightShoulder,
            Landmark::LeftHip,
            Landmark::RightHip,
        ] {
            map.insert(landmark, Keypoint::new(x, 0.5, 0.9));
        }
        map
    }

    fn session(model: ScriptedModel) -> InferenceSession<ScriptedModel, NullTransport> {
        InferenceSession::new(model, NullTransport, "video-1", &Config::default())
    }

    #[test]
    fn test_first_frame_gets_full_region() {
        let session = session(ScriptedModel::new(vec![Ok(full_pose(0.4))]));
        let inference = session.process_frame(&frame()).unwrap().unwrap();
        assert_eq!(inference.frame_index, 0);
        assert!(!inference.keypoints.is_empty());

        let state = session.state.lock();
        assert_eq!(state.model.seen_regions, vec![NormalizedRect::full()]);
    }

    #[test]
    fn test_second_frame_uses_estimated_region() {
        let session = session(ScriptedModel::new(vec![Ok(full_pose(0.4)), Ok(full_pose(0.5))]));
        session.process_frame(&frame()).unwrap().unwrap();
        session.process_frame(&frame()).unwrap().unwrap();

        let state = session.state.lock();
        assert_eq!(state.model.seen_regions[0], NormalizedRect::full());
        assert!(!state.model.seen_regions[1].is_full());
    }

    #[test]
    fn test_failed_frame_keeps_smoothing_chain() {
        let session = session(ScriptedModel::new(vec![
            Ok(full_pose(0.4)),
            Err("transient".to_string()),
            Ok(full_pose(0.8)),
        ]));

        let first = session.process_frame(&frame()).unwrap().unwrap();
        assert!(session.process_frame(&frame()).is_err());

        // 失敗フレームは last_keypoints を更新しない:
        // 3フレーム目は1フレーム目の成功結果に対して平滑化される
        let third = session.process_frame(&frame()).unwrap().unwrap();
        let smoothed = third.keypoint_for(Landmark::LeftHip).unwrap();
        let prev = first.keypoint_for(Landmark::LeftHip).unwrap();
        // w=0.25: 0.75*0.4 + 0.25*0.8 = 0.5
        assert!((smoothed.x - (0.75 * prev.x + 0.25 * 0.8)).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_output_is_rejected() {
        let mut bad = KeypointMap::new();
        bad.insert(Landmark::Nose, Keypoint::new(f64::NAN, 0.5, 0.9));
        let session = session(ScriptedModel::new(vec![Ok(bad)]));

        let err = session.process_frame(&frame()).unwrap_err();
        assert!(matches!(err, InferenceError::MalformedOutput(_)));
        assert!(session.state.lock().last_keypoints.is_none());
    }

    #[test]
    fn test_frame_indices_advance_for_dropped_frames() {
        let session = session(ScriptedModel::new(vec![Ok(full_pose(0.4))]));

        // 推論ロックを保持したまま別スレッドから処理を試みる
        let guard = session.state.lock();
        let dropped = session.process_frame(&frame()).unwrap();
        assert!(dropped.is_none());
        drop(guard);

        let inference = session.process_frame(&frame()).unwrap().unwrap();
        // 捨てたフレームのぶん番号が飛ぶ
        assert_eq!(inference.frame_index, 1);
    }

    #[test]
    fn test_concurrent_frames_single_flight() {
        struct BlockingModel {
            barrier: Arc<Barrier>,
            calls: Arc<AtomicUsize>,
        }

        impl PoseModel for BlockingModel {
            fn infer(
                &mut self,
                _frame: &VideoFrame,
                _region: NormalizedRect,
            ) -> Result<KeypointMap, InferenceError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                // 2回待つ: もう一方のスレッドがdropを観測してから解放される
                self.barrier.wait();
                self.barrier.wait();
                Ok(KeypointMap::new())
            }
        }

        let barrier = Arc::new(Barrier::new(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(InferenceSession::new(
            BlockingModel {
                barrier: Arc::clone(&barrier),
                calls: Arc::clone(&calls),
            },
            NullTransport,
            "video-1",
            &Config::default(),
        ));

        let worker = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.process_frame(&frame()))
        };

        // 1本目が推論に入るまで待ってから2本目を投げる
        barrier.wait();
        let dropped = session.process_frame(&frame()).unwrap();
        assert!(dropped.is_none());
        barrier.wait();

        assert!(worker.join().unwrap().unwrap().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_and_finish() {
        let session = session(ScriptedModel::new(vec![Ok(full_pose(0.4))]));
        let inference = session.process_frame(&frame()).unwrap().unwrap();

        let analysis = session.dispatch(&inference).await.unwrap();
        assert_eq!(analysis, Some(Analysis::default()));

        let final_analysis = session.finish().await.unwrap();
        assert_eq!(final_analysis, Analysis::default());
    }
}
