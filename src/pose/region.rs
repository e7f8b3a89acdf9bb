use crate::config::RegionConfig;

use super::keypoint::{Keypoint, KeypointMap, Landmark};

/// クロップ領域（正規化座標 0.0〜1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn full() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.width >= 1.0 && self.height >= 1.0
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }
}

/// 前フレームの平滑化済みキーポイントから次フレームのクロップ領域を推定する
///
/// 体幹（両肩・両腰）が見えていれば被写体に寄せた矩形を返し、
/// 見えていなければフルフレームにフォールバックする。純粋関数。
#[derive(Debug, Clone)]
pub struct RegionEstimator {
    visibility_threshold: f64,
    padding_factor: f64,
    torso_scale: f64,
    body_scale: f64,
}

const TORSO_LANDMARKS: [Landmark; 4] = [
    Landmark::LeftShoulder,
    Landmark::RightShoulder,
    Landmark::LeftHip,
    Landmark::RightHip,
];

impl RegionEstimator {
    pub fn new(visibility_threshold: f64, padding_factor: f64, torso_scale: f64, body_scale: f64) -> Self {
        Self {
            visibility_threshold,
            padding_factor,
            torso_scale,
            body_scale,
        }
    }

    pub fn from_config(config: &RegionConfig) -> Self {
        Self::new(
            config.visibility_threshold,
            config.padding_factor,
            config.torso_scale,
            config.body_scale,
        )
    }

    pub fn estimate(&self, previous: Option<&KeypointMap>) -> NormalizedRect {
        let Some(keypoints) = previous else {
            return NormalizedRect::full();
        };

        let torso_visible = TORSO_LANDMARKS.iter().all(|landmark| {
            keypoints
                .get(landmark)
                .is_some_and(|kp| kp.is_visible(self.visibility_threshold))
        });
        if !torso_visible {
            return NormalizedRect::full();
        }

        // torso_visible チェック済みなので4点とも存在する
        let torso_box = match self.enclosing_box(keypoints, &TORSO_LANDMARKS) {
            Some(rect) => rect,
            None => return NormalizedRect::full(),
        };
        let body_box = match self.enclosing_box(keypoints, &Landmark::ALL) {
            Some(rect) => rect,
            None => return NormalizedRect::full(),
        };

        let left_hip = &keypoints[&Landmark::LeftHip];
        let right_hip = &keypoints[&Landmark::RightHip];
        let center_x = (left_hip.x + right_hip.x) / 2.0;
        let center_y = (left_hip.y + right_hip.y) / 2.0;

        // 全身BBoxを各軸15%パディングして[0,1]にクランプ
        let x_padding = self.padding_factor * body_box.width;
        let y_padding = self.padding_factor * body_box.height;
        let x_min = (body_box.x - x_padding).max(0.0);
        let x_max = (body_box.max_x() + x_padding).min(1.0);
        let y_min = (body_box.y - y_padding).max(0.0);
        let y_max = (body_box.max_y() + y_padding).min(1.0);

        // 腰中点を中心としたクロップと、パディング済み全身BBoxの和集合。
        // クロップがパディング済みBBoxより小さくなることはない。
        let crop_width = (torso_box.width * self.torso_scale).max(body_box.width * self.body_scale);
        let crop_height = (torso_box.height * self.torso_scale).max(body_box.height * self.body_scale);
        let x1 = x_min.min(center_x - crop_width / 2.0);
        let x2 = x_max.max(center_x + crop_width / 2.0);
        let y1 = y_min.min(center_y - crop_height / 2.0);
        let y2 = y_max.max(center_y + crop_height / 2.0);

        NormalizedRect {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// 可視ランドマークのmin/maxから外接矩形を返す。可視点が無ければNone。
    fn enclosing_box(&self, keypoints: &KeypointMap, landmarks: &[Landmark]) -> Option<NormalizedRect> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        let mut count = 0u32;

        for landmark in landmarks {
            let visible: Option<&Keypoint> = keypoints
                .get(landmark)
                .filter(|kp| kp.is_visible(self.visibility_threshold));
            if let Some(kp) = visible {
                min_x = min_x.min(kp.x);
                min_y = min_y.min(kp.y);
                max_x = max_x.max(kp.x);
                max_y = max_y.max(kp.y);
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }

        Some(NormalizedRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}
