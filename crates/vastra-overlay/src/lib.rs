//! vastra-overlay: Pose stabilization and garment compositing (sans-IO).
//!
//! Turns a camera frame plus pose landmarks into the same frame with a
//! parametric garment drawn over the subject's upper body:
//! landmarks -> pose sample -> temporal smoothing -> stability gate ->
//! garment raster -> perspective warp -> alpha blend.
//!
//! This crate has **no I/O dependencies**. Pose estimation is pluggable
//! through [`LandmarkSource`]; frames are in-memory [`RgbaImage`]s. Frame
//! decoding, camera capture and file output live in the caller (see
//! `vastra-bench`).

pub mod blur;
pub mod compositor;
pub mod config;
pub mod diagnostics;
pub mod garment;
pub mod gate;
pub mod landmarks;
pub mod overlay;
pub mod sampler;
pub mod session;
pub mod stabilizer;
pub mod types;

pub use config::OverlayConfig;
pub use diagnostics::{Clock, FrameDiagnostics, WebClock};
pub use garment::GarmentVariant;
pub use landmarks::{LandmarkSet, LandmarkSource, RawLandmark, ReplaySource};
pub use overlay::{CompositeFrame, OverlayEngine, OverlayStatus, PoseResult};
pub use sampler::{Landmarks, Measurements, PoseSample};
pub use session::{Session, SessionId, SessionRegistry};
pub use types::{Dimensions, Keypoint, OverlayError, Point, Rgb, RgbaImage};
