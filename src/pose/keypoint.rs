use std::collections::BTreeMap;
use std::time::Instant;

/// COCO 17 ランドマークの固定スロット
///
/// enum の宣言順 = COCO インデックス。ワイヤ名との対応は [`Landmark::name`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Landmark {
    pub const COUNT: usize = 17;

    pub const ALL: [Landmark; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            1 => Some(Self::LeftEye),
            2 => Some(Self::RightEye),
            3 => Some(Self::LeftEar),
            4 => Some(Self::RightEar),
            5 => Some(Self::LeftShoulder),
            6 => Some(Self::RightShoulder),
            7 => Some(Self::LeftElbow),
            8 => Some(Self::RightElbow),
            9 => Some(Self::LeftWrist),
            10 => Some(Self::RightWrist),
            11 => Some(Self::LeftHip),
            12 => Some(Self::RightHip),
            13 => Some(Self::LeftKnee),
            14 => Some(Self::RightKnee),
            15 => Some(Self::LeftAnkle),
            16 => Some(Self::RightAnkle),
            _ => None,
        }
    }

    /// 分析サービスのペイロードで使うスネークケース名
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }
}

/// 単一キーポイント
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f64,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f64,
    /// 信頼度スコア (0.0〜1.0)
    pub score: f64,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, score: f64) -> Self {
        Self { x, y, score }
    }

    /// 信頼度が閾値より大きいか
    pub fn is_visible(&self, threshold: f64) -> bool {
        self.score > threshold
    }

    /// ピクセル座標に変換
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        let px = (self.x * width as f64) as i32;
        let py = (self.y * height as f64) as i32;
        (px, py)
    }
}

/// ランドマーク不在はマップからの欠落で表現する（NaN キーポイントは作らない）
pub type KeypointMap = BTreeMap<Landmark, Keypoint>;

/// 被写体の向き（鼻と両肩の位置関係から推定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacing {
    Left,
    Right,
    Other,
}

/// 1フレーム分の推論結果。構築後は不変。
///
/// 前フレームへの参照は保持しない。平滑化の入力として必要なのは直前の
/// 成功フレームのキーポイントマップだけで、それはセッション側が持つ。
#[derive(Debug, Clone)]
pub struct FrameInference {
    pub frame_index: u64,
    pub timestamp: Instant,
    pub seconds_since_start: f64,
    pub keypoints: KeypointMap,
}

impl FrameInference {
    pub fn keypoint_for(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.keypoints.get(&landmark)
    }

    /// 鼻が両肩より外側にあればユーザは横を向いている
    pub fn user_facing(&self) -> UserFacing {
        let (Some(nose), Some(left), Some(right)) = (
            self.keypoint_for(Landmark::Nose),
            self.keypoint_for(Landmark::LeftShoulder),
            self.keypoint_for(Landmark::RightShoulder),
        ) else {
            return UserFacing::Other;
        };

        if nose.x < left.x && nose.x < right.x {
            UserFacing::Right
        } else if nose.x > left.x && nose.x > right.x {
            UserFacing::Left
        } else {
            UserFacing::Other
        }
    }
}
