//! 分析サービスとのワイヤ型
//!
//! フレームペイロードは `{frameIndex, timestamp, <landmark>: {x, y, score}, …}`
//! の平坦なオブジェクト。ランドマーク名は [`Landmark::name`] の固定対応表で、
//! 欠落ランドマークはフィールドごと省略する。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::pose::{FrameInference, Landmark};

/// PATCH リクエストボディの1要素
#[derive(Debug, Clone, Serialize)]
pub struct FramePayload {
    #[serde(rename = "frameIndex")]
    pub frame_index: u64,
    /// セッション開始からの経過秒
    pub timestamp: f64,
    #[serde(flatten)]
    pub keypoints: BTreeMap<&'static str, KeypointWire>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KeypointWire {
    pub x: f64,
    pub y: f64,
    pub score: f64,
}

impl FramePayload {
    pub fn from_inference(inference: &FrameInference) -> Self {
        let mut keypoints = BTreeMap::new();
        for landmark in Landmark::ALL {
            if let Some(kp) = inference.keypoint_for(landmark) {
                keypoints.insert(
                    landmark.name(),
                    KeypointWire {
                        x: kp.x,
                        y: kp.y,
                        score: kp.score,
                    },
                );
            }
        }
        Self {
            frame_index: inference.frame_index,
            timestamp: inference.seconds_since_start,
            keypoints,
        }
    }
}

/// サーバが計算した分析結果（公開型）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    /// 認識された動作ラベル
    pub movement: Option<String>,
    pub reps: Vec<Rep>,
}

/// 1レップの区間と各種スカラ分析値
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rep {
    pub start_timestamp_ms: u64,
    pub mid_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    pub analyses: BTreeMap<String, f64>,
}

/// `PATCH /videos/{id}/j2p` のレスポンスボディ
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisResponse {
    #[serde(rename = "liftType", default)]
    pub lift_type: Option<String>,
    #[serde(default)]
    pub reps: Vec<RepWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepWire {
    pub start_timestamp_ms: u64,
    pub mid_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    #[serde(default)]
    pub analyses: Vec<RepAnalysisWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepAnalysisWire {
    pub analysis_type: String,
    #[serde(default)]
    pub analysis_scalar: Option<f64>,
}

impl From<AnalysisResponse> for Analysis {
    fn from(response: AnalysisResponse) -> Self {
        let reps = response
            .reps
            .into_iter()
            .map(|rep| Rep {
                start_timestamp_ms: rep.start_timestamp_ms,
                mid_timestamp_ms: rep.mid_timestamp_ms,
                end_timestamp_ms: rep.end_timestamp_ms,
                analyses: rep
                    .analyses
                    .into_iter()
                    .filter_map(|a| a.analysis_scalar.map(|scalar| (a.analysis_type, scalar)))
                    .collect(),
            })
            .collect();
        Self {
            movement: response.lift_type,
            reps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, KeypointMap};
    use std::time::Instant;

    #[test]
    fn test_frame_payload_flattens_landmarks() {
        let mut keypoints = KeypointMap::new();
        keypoints.insert(Landmark::LeftWrist, Keypoint::new(0.1, 0.2, 0.9));
        let inference = FrameInference {
            frame_index: 7,
            timestamp: Instant::now(),
            seconds_since_start: 1.5,
            keypoints,
        };

        let json = serde_json::to_value(FramePayload::from_inference(&inference)).unwrap();

        assert_eq!(json["frameIndex"], 7);
        assert_eq!(json["timestamp"], 1.5);
        assert_eq!(json["left_wrist"]["x"], 0.1);
        assert_eq!(json["left_wrist"]["y"], 0.2);
        assert_eq!(json["left_wrist"]["score"], 0.9);
        // 欠落ランドマークはフィールドごと省略される
        assert!(json.get("nose").is_none());
    }

    #[test]
    fn test_analysis_response_into_analysis() {
        let body = r#"{
            "liftType": "squat",
            "reps": [
                {
                    "startTimestampMs": 100,
                    "midTimestampMs": 550,
                    "endTimestampMs": 1000,
                    "analyses": [
                        {"analysisType": "depth", "analysisScalar": 0.82},
                        {"analysisType": "unscored", "analysisScalar": null}
                    ]
                }
            ]
        }"#;

        let response: AnalysisResponse = serde_json::from_str(body).unwrap();
        let analysis: Analysis = response.into();

        assert_eq!(analysis.movement.as_deref(), Some("squat"));
        assert_eq!(analysis.reps.len(), 1);
        let rep = &analysis.reps[0];
        assert_eq!(rep.start_timestamp_ms, 100);
        assert_eq!(rep.mid_timestamp_ms, 550);
        assert_eq!(rep.end_timestamp_ms, 1000);
        assert_eq!(rep.analyses.get("depth"), Some(&0.82));
        assert!(!rep.analyses.contains_key("unscored"));
    }

    #[test]
    fn test_analysis_response_tolerates_missing_fields() {
        let response: AnalysisResponse = serde_json::from_str("{}").unwrap();
        let analysis: Analysis = response.into();
        assert_eq!(analysis, Analysis::default());
    }
}
