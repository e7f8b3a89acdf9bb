pub mod client;
pub mod types;

pub use client::{AnalysisClient, AnalysisTransport};
pub use types::{Analysis, AnalysisResponse, FramePayload, KeypointWire, Rep};
