//! ONNX Runtime バックエンドの PoseModel 実装
//!
//! ModelStore が確定した `.onnx` アーティファクトを読み込み、
//! クロップ領域の最近傍リサンプリング → NCHW テンソル → 推論 →
//! フレーム全体座標への逆変換を行う。

use std::path::Path;

use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{InferenceError, ModelError};
use crate::session::{PoseModel, VideoFrame};

use super::keypoint::{Keypoint, KeypointMap, Landmark};
use super::region::NormalizedRect;

/// モデル入力解像度 (width, height)
const INPUT_WIDTH: usize = 192;
const INPUT_HEIGHT: usize = 256;

pub struct OnnxPoseModel {
    session: Session,
}

impl OnnxPoseModel {
    /// 確定済みONNXモデルを読み込んで初期化
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, ModelError> {
        let session = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.commit_from_file(model_path.as_ref()))
            .map_err(|e| ModelError::CompileFailed(e.to_string()))?;
        Ok(Self { session })
    }
}

impl PoseModel for OnnxPoseModel {
    fn infer(
        &mut self,
        frame: &VideoFrame,
        region: NormalizedRect,
    ) -> Result<KeypointMap, InferenceError> {
        let input = crop_to_tensor(frame, &region)
            .ok_or_else(|| InferenceError::MalformedOutput("empty video frame".to_string()))?;
        let input_tensor = Tensor::from_array(input)
            .map_err(|e| InferenceError::ModelFailed(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["image_nchw" => input_tensor])
            .map_err(|e| InferenceError::ModelFailed(e.to_string()))?;

        // 出力: keypoints [1, 17, 2] (x, y; クロップ内正規化), scores [1, 17]
        let keypoints: ndarray::ArrayViewD<f32> = outputs["keypoints"]
            .try_extract_array()
            .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?;
        let scores: ndarray::ArrayViewD<f32> = outputs["scores"]
            .try_extract_array()
            .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?;

        let mut result = KeypointMap::new();
        for (i, landmark) in Landmark::ALL.into_iter().enumerate() {
            let x = keypoints[[0, i, 0]] as f64;
            let y = keypoints[[0, i, 1]] as f64;
            let score = scores[[0, i]] as f64;
            result.insert(landmark, remap_to_frame(Keypoint::new(x, y, score), &region));
        }
        Ok(result)
    }
}

/// クロップ内正規化座標をフレーム全体の正規化座標に変換
fn remap_to_frame(kp: Keypoint, region: &NormalizedRect) -> Keypoint {
    Keypoint::new(
        region.x + kp.x * region.width,
        region.y + kp.y * region.height,
        kp.score,
    )
}

/// クロップ領域を最近傍で INPUT_WIDTH×INPUT_HEIGHT にリサンプリングし、
/// /255 正規化した NCHW テンソルを返す
fn crop_to_tensor(frame: &VideoFrame, region: &NormalizedRect) -> Option<Array4<f32>> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }
    let fw = frame.width as f64;
    let fh = frame.height as f64;

    // 領域はフレーム外にはみ出し得るのでここでクリップする
    let x0 = (region.x.max(0.0) * fw) as usize;
    let y0 = (region.y.max(0.0) * fh) as usize;
    let x1 = ((region.max_x().min(1.0) * fw) as usize).max(x0 + 1).min(frame.width as usize);
    let y1 = ((region.max_y().min(1.0) * fh) as usize).max(y0 + 1).min(frame.height as usize);
    let crop_w = x1.saturating_sub(x0).max(1);
    let crop_h = y1.saturating_sub(y0).max(1);

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT, INPUT_WIDTH));
    for ty in 0..INPUT_HEIGHT {
        let sy = (y0 + ty * crop_h / INPUT_HEIGHT).min(frame.height as usize - 1);
        for tx in 0..INPUT_WIDTH {
            let sx = (x0 + tx * crop_w / INPUT_WIDTH).min(frame.width as usize - 1);
            let offset = (sy * frame.width as usize + sx) * 3;
            for channel in 0..3 {
                tensor[[0, channel, ty, tx]] = frame.rgb[offset + channel] as f32 / 255.0;
            }
        }
    }
    Some(tensor)
}
