use crate::config::SmoothConfig;

use super::keypoint::{Keypoint, KeypointMap, Landmark};

/// キーポイントのフレーム間ジッタを抑えるEMAベースの平滑化
///
/// 信頼度が低いサンプルは伝播させない:
/// 前フレームが低信頼なら現フレームをそのまま通し、
/// 現フレームが低信頼なら前フレームの値を保持する。
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    /// 現フレームサンプルに掛ける重み
    blend_weight: f64,
    min_score: f64,
}

impl TemporalSmoother {
    pub fn new(blend_weight: f64, min_score: f64) -> Self {
        Self {
            blend_weight,
            min_score,
        }
    }

    pub fn from_config(config: &SmoothConfig) -> Self {
        Self::new(config.blend_weight, config.min_score)
    }

    /// 固定ランドマーク集合を走査する。currentに無いランドマークはスコア0扱い。
    pub fn smooth(&self, current: &KeypointMap, previous: Option<&KeypointMap>) -> KeypointMap {
        let w = self.blend_weight;
        let mut smoothed = KeypointMap::new();

        for landmark in Landmark::ALL {
            let cur = current.get(&landmark);
            let prev = previous.and_then(|map| map.get(&landmark));

            let prev_usable = prev.is_some_and(|kp| kp.score >= self.min_score);
            let cur_usable = cur.is_some_and(|kp| kp.score >= self.min_score);

            let result = if !prev_usable {
                cur.copied()
            } else if !cur_usable {
                prev.copied()
            } else if let (Some(prev), Some(cur)) = (prev, cur) {
                Some(Keypoint::new(
                    (1.0 - w) * prev.x + w * cur.x,
                    (1.0 - w) * prev.y + w * cur.y,
                    (1.0 - w) * prev.score + w * cur.score,
                ))
            } else {
                None
            };

            if let Some(kp) = result {
                smoothed.insert(landmark, kp);
            }
        }

        smoothed
    }
}
