//! Integration tests: drive try-on sessions frame by frame through the public engine API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use image::Rgba;
use vastra_overlay::diagnostics::StageMetrics;
use vastra_overlay::{
    GarmentVariant, Keypoint, LandmarkSet, LandmarkSource, Landmarks, Measurements, OverlayConfig,
    OverlayEngine, Point, PoseResult, PoseSample, RawLandmark, ReplaySource, Rgb, RgbaImage,
    Session, WebClock,
};

const BACKGROUND: Rgba<u8> = Rgba([40, 40, 40, 255]);

fn frame() -> RgbaImage {
    RgbaImage::from_pixel(640, 480, BACKGROUND)
}

fn shoulders(left: (f64, f64), right: (f64, f64), visibility: f64) -> Option<LandmarkSet> {
    Some(LandmarkSet::new(vec![
        RawLandmark::new(Keypoint::LeftShoulder, Point::new(left.0, left.1), visibility),
        RawLandmark::new(Keypoint::RightShoulder, Point::new(right.0, right.1), visibility),
        RawLandmark::new(Keypoint::Nose, Point::new(320.0, 120.0), visibility),
    ]))
}

fn level(visibility: f64) -> Option<LandmarkSet> {
    shoulders((220.0, 200.0), (420.0, 200.0), visibility)
}

/// A live pose with level shoulders shifted `dx` pixels to the right.
fn pose(confidence: f64, dx: f64) -> PoseResult {
    let left = Point::new(220.0 + dx, 200.0);
    let right = Point::new(420.0 + dx, 200.0);
    PoseResult::live(PoseSample {
        landmarks: Landmarks {
            left_shoulder: left,
            right_shoulder: right,
            ..Landmarks::default()
        },
        measurements: Measurements::from_shoulders(left, right, 200.0),
        confidence,
        timestamp: 0.0,
    })
}

fn engine(track: Vec<Option<LandmarkSet>>) -> OverlayEngine<ReplaySource> {
    engine_with(track, OverlayConfig::default())
}

fn engine_with(track: Vec<Option<LandmarkSet>>, config: OverlayConfig) -> OverlayEngine<ReplaySource> {
    OverlayEngine::new(ReplaySource::new(track), config).expect("valid config")
}

fn assert_close(actual: Rgba<u8>, expected: [u8; 4]) {
    for (a, e) in actual.0.iter().zip(expected) {
        assert!(a.abs_diff(e) <= 3, "pixel {actual:?} not close to {expected:?}");
    }
}

#[test]
fn confident_tshirt_frame_is_composited() {
    let engine = engine(vec![level(0.9)]);
    let mut session = engine.new_session();
    let input = frame();

    let (pose, out) = engine.process_frame(
        &mut session,
        &input,
        GarmentVariant::TShirt,
        Rgb::DEFAULT,
        true,
    );

    assert!(pose.success);
    assert!(out.status.success);
    assert!(!out.status.frozen);
    assert_eq!(out.status.outfit_type, Some(GarmentVariant::TShirt));
    assert!((out.status.confidence - 0.9).abs() < 1e-9);
    assert!(out.status.error.is_none());

    // Chest is solid garment colour; the corner is untouched.
    assert_close(*out.image.get_pixel(320, 300), [0x66, 0x7e, 0xea, 255]);
    assert_eq!(*out.image.get_pixel(5, 5), BACKGROUND);
    assert!(session.state().last_stable_render().is_some());
}

#[test]
fn level_shoulders_measure_as_expected() {
    let engine = engine(vec![shoulders((100.0, 200.0), (300.0, 200.0), 0.9)]);
    let mut session = engine.new_session();
    let input = frame();

    let pose = engine.detect_pose(&mut session, &input);
    let m = pose.measurements().unwrap();
    assert!((m.shoulder_distance - 200.0).abs() < 1e-9);
    assert!(m.shoulder_tilt.abs() < 1e-12);
    assert!((m.depth_scale - 1.0).abs() < 1e-12);
    assert_eq!(m.body_center, Point::new(200.0, 200.0));

    let out = engine.apply_clothing(
        &mut session,
        &input,
        GarmentVariant::TShirt,
        Rgb::DEFAULT,
        &pose,
        true,
    );
    assert!(out.status.success);
    assert!(!out.status.frozen);
    assert!((out.status.confidence - 0.9).abs() < 1e-12);
}

#[test]
fn low_confidence_frames_hold_the_last_stable_render() {
    let engine = engine(vec![]);
    let mut session = engine.new_session();
    let input = frame();

    // Each frame's subject stands somewhere else, so live renders differ.
    let confidences = [0.8, 0.4, 0.9, 0.3, 0.85];
    let outputs: Vec<_> = confidences
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            #[allow(clippy::cast_precision_loss)]
            let dx = i as f64 * 15.0;
            engine.apply_clothing(
                &mut session,
                &input,
                GarmentVariant::Kurta,
                Rgb::new(180, 40, 40),
                &pose(c, dx),
                true,
            )
        })
        .collect();

    let frozen: Vec<bool> = outputs.iter().map(|o| o.status.frozen).collect();
    assert_eq!(frozen, [false, true, false, true, false]);
    assert!(outputs.iter().all(|o| o.status.success));
    for (out, c) in outputs.iter().zip(confidences) {
        assert!((out.status.confidence - c).abs() < 1e-12);
    }

    assert_eq!(outputs[1].image, outputs[0].image);
    assert_eq!(outputs[3].image, outputs[2].image);
    assert_ne!(outputs[2].image, outputs[0].image);
    assert_ne!(outputs[4].image, outputs[2].image);
}

#[test]
fn first_low_confidence_frame_fails_instead_of_freezing() {
    let engine = engine(vec![level(0.4)]);
    let mut session = engine.new_session();
    let input = frame();

    let (detected, out) = engine.process_frame(
        &mut session,
        &input,
        GarmentVariant::Shirt,
        Rgb::DEFAULT,
        true,
    );
    assert!(!detected.success);
    assert!(detected.error.unwrap().contains("low pose confidence"));
    assert!(!out.status.success);
    assert!(!out.status.frozen);
    assert_eq!(out.image, input);

    // Same when a low-confidence pose is handed to apply_clothing directly.
    let mut fresh = engine.new_session();
    let out = engine.apply_clothing(
        &mut fresh,
        &input,
        GarmentVariant::Shirt,
        Rgb::DEFAULT,
        &pose(0.4, 0.0),
        true,
    );
    assert!(!out.status.success);
    assert_eq!(out.image, input);
}

#[test]
fn low_confidence_without_freeze_renders_live_but_is_not_cached() {
    let engine = engine(vec![]);
    let mut session = engine.new_session();
    let input = frame();

    let out = engine.apply_clothing(
        &mut session,
        &input,
        GarmentVariant::Dress,
        Rgb::DEFAULT,
        &pose(0.3, 0.0),
        false,
    );
    assert!(out.status.success);
    assert!(!out.status.frozen);
    assert_ne!(out.image, input);
    assert!(session.state().last_stable_render().is_none());
}

#[test]
fn detection_dropout_freezes_on_stable_pose() {
    let track = vec![
        level(0.9),
        level(0.9),
        level(0.9),
        level(0.1),
        level(0.1),
        level(0.1),
        None,
    ];
    let engine = engine(track);
    let mut session = engine.new_session();
    let input = frame();

    let results: Vec<_> = (0..7)
        .map(|_| {
            engine.process_frame(
                &mut session,
                &input,
                GarmentVariant::Hoodie,
                Rgb::DEFAULT,
                true,
            )
        })
        .collect();

    // Frame 4 still averages above the threshold.
    let (pose, out) = &results[3];
    assert!(!pose.frozen);
    assert!((pose.confidence - (0.9 + 0.9 + 0.1) / 3.0).abs() < 1e-9);
    assert!(!out.status.frozen);

    // Frames 5 and 6 fall below it and hold frame 4's render.
    for (pose, out) in &results[4..6] {
        assert!(pose.success);
        assert!(pose.frozen);
        assert!(pose.confidence < 0.6);
        assert!(out.status.frozen);
        assert_eq!(out.image, results[3].1.image);
    }

    // A frame with nobody in it still holds the render.
    let (pose, out) = &results[6];
    assert!(!pose.success);
    assert!(pose.confidence.abs() < f64::EPSILON);
    assert!(out.status.success);
    assert!(out.status.frozen);
    assert_eq!(out.image, results[3].1.image);

    assert_eq!(session.frames(), 7);
}

#[test]
fn frozen_state_expires_after_configured_frames() {
    let config = OverlayConfig {
        max_frozen_frames: Some(2),
        ..OverlayConfig::default()
    };
    let track = vec![level(0.9), level(0.1), level(0.1), level(0.1), level(0.1)];
    let engine = engine_with(track, config);
    let mut session = engine.new_session();
    let input = frame();

    let frozen: Vec<(bool, bool)> = (0..5)
        .map(|_| {
            let (_, out) = engine.process_frame(
                &mut session,
                &input,
                GarmentVariant::Jacket,
                Rgb::DEFAULT,
                true,
            );
            (out.status.success, out.status.frozen)
        })
        .collect();

    assert_eq!(
        frozen,
        [(true, false), (true, true), (true, true), (false, false), (false, false)]
    );
    assert!(session.state().last_stable_render().is_none());
}

#[test]
fn unknown_clothing_type_is_rejected() {
    let engine = engine(vec![level(0.95)]);
    let mut session = engine.new_session();
    let input = frame();
    let pose = engine.detect_pose(&mut session, &input);

    let out = engine.apply_clothing_named(&mut session, &input, "cape", Rgb::DEFAULT, &pose, true);
    assert!(!out.status.success);
    assert!(out.status.error.unwrap().starts_with("invalid clothing type: cape"));
    assert_eq!(out.image, input);

    let out = engine.apply_clothing_named(&mut session, &input, "kurta", Rgb::DEFAULT, &pose, true);
    assert!(out.status.success);
    assert_eq!(out.status.outfit_type, Some(GarmentVariant::Kurta));
}

#[test]
fn sessions_do_not_share_freeze_memory() {
    let engine = engine(vec![]);
    let mut registry = engine.session_registry();
    let a = registry.create();
    let b = registry.create();
    let input = frame();

    let out = engine.apply_clothing(
        registry.get_mut(a).unwrap(),
        &input,
        GarmentVariant::TShirt,
        Rgb::DEFAULT,
        &pose(0.9, 0.0),
        true,
    );
    assert!(out.status.success);

    // Session b has never been stable, so it cannot borrow a's render.
    let out = engine.apply_clothing(
        registry.get_mut(b).unwrap(),
        &input,
        GarmentVariant::TShirt,
        Rgb::DEFAULT,
        &pose(0.2, 0.0),
        true,
    );
    assert!(!out.status.success);
    assert_eq!(out.image, input);

    assert!(registry.get(a).unwrap().state().last_stable_render().is_some());
    assert!(registry.get(b).unwrap().state().last_stable_render().is_none());
}

#[test]
fn confidence_stays_in_unit_interval() {
    let track = vec![level(1.7), level(-0.5), level(2.0), level(0.3)];
    let engine = engine(track);
    let mut session = engine.new_session();
    let input = frame();

    for _ in 0..4 {
        let (pose, out) = engine.process_frame(
            &mut session,
            &input,
            GarmentVariant::Shirt,
            Rgb::DEFAULT,
            true,
        );
        assert!((0.0..=1.0).contains(&pose.confidence), "{pose:?}");
        assert!((0.0..=1.0).contains(&out.status.confidence));
    }
}

#[test]
fn tilted_shoulders_rotate_the_garment() {
    let engine = engine(vec![shoulders((220.0, 230.0), (420.0, 190.0), 0.9)]);
    let mut session = engine.new_session();

    let (pose, out, diag) = engine.process_frame_with_diagnostics(
        &mut session,
        &frame(),
        GarmentVariant::TShirt,
        Rgb::DEFAULT,
        true,
        &WebClock,
    );
    assert!(out.status.success);

    let tilt = pose.measurements().unwrap().shoulder_tilt;
    assert!((tilt - (-40.0f64).atan2(200.0)).abs() < 1e-9);
    assert!(matches!(
        diag.warp.unwrap().metrics,
        StageMetrics::Warp { rotation, covered_pixel_count } if (rotation - tilt).abs() < 1e-9 && covered_pixel_count > 0
    ));
}

#[test]
fn frozen_frame_diagnostics_skip_render_stages() {
    let engine = engine(vec![level(0.9), level(0.0), level(0.0)]);
    let mut session = engine.new_session();
    let input = frame();

    let mut last = None;
    for _ in 0..3 {
        last = Some(engine.process_frame_with_diagnostics(
            &mut session,
            &input,
            GarmentVariant::TShirt,
            Rgb::DEFAULT,
            true,
            &WebClock,
        ));
    }
    let (_, out, diag) = last.unwrap();
    assert!(out.status.frozen);
    assert!(diag.summary.frozen);
    assert!(diag.garment.is_none() && diag.warp.is_none() && diag.blend.is_none());

    let names: Vec<&str> = diag.stages().iter().map(|(name, _)| *name).collect();
    assert_eq!(names, ["Detect", "Stabilize"]);
    assert!(diag.report().contains("Frozen: true"));
}

#[test]
fn close_subject_on_full_hd_frame_still_renders() {
    let input = RgbaImage::from_pixel(1920, 1080, BACKGROUND);

    for variant in GarmentVariant::ALL {
        let engine = engine(vec![shoulders((560.0, 500.0), (1360.0, 500.0), 0.95)]);
        let mut session = engine.new_session();

        let (pose, out, diag) = engine.process_frame_with_diagnostics(
            &mut session,
            &input,
            variant,
            Rgb::DEFAULT,
            true,
            &WebClock,
        );
        assert!(pose.success);
        assert!(out.status.success, "{variant}: {:?}", out.status.error);
        assert!(!out.status.frozen);
        assert!(out.status.error.is_none());

        let max_side = engine.config().max_garment_dimension;
        assert!(matches!(
            diag.garment.unwrap().metrics,
            StageMetrics::Garment { width, height, .. } if width <= max_side && height <= max_side
        ));
        // The quad runs past the frame bottom, so the garment reaches the last row.
        assert_close(*out.image.get_pixel(960, 1079), [0x66, 0x7e, 0xea, 255]);
    }
}

/// Derives shoulder visibility from the red channel of the frame's top-left
/// pixel, so each caller controls its own detections through the frames it
/// submits.
struct RedCueSource;

impl LandmarkSource for RedCueSource {
    fn detect(&self, frame: &RgbaImage) -> Option<LandmarkSet> {
        let visibility = if frame.get_pixel(0, 0).0[0] == 255 { 0.9 } else { 0.0 };
        level(visibility)
    }
}

fn cued_frame(visible: bool) -> RgbaImage {
    let mut input = frame();
    if visible {
        input.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
    }
    input
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn concurrent_sessions_on_one_engine_stay_isolated() {
    assert_send_sync::<OverlayEngine<ReplaySource>>();
    assert_send_sync::<Session>();

    let engine = OverlayEngine::new(RedCueSource, OverlayConfig::default()).expect("valid config");
    let red = Rgb::new(230, 20, 20);
    let blue = Rgb::new(20, 20, 230);

    let run = |color: Rgb, visible: &[bool]| {
        let mut session = engine.new_session();
        visible
            .iter()
            .map(|&v| {
                engine
                    .process_frame(&mut session, &cued_frame(v), GarmentVariant::TShirt, color, true)
                    .1
            })
            .collect::<Vec<_>>()
    };

    let (steady, dropout) = std::thread::scope(|scope| {
        let steady = scope.spawn(|| run(red, &[true; 10]));
        let dropout = scope.spawn(|| {
            let mut visible = vec![true; 3];
            visible.extend([false; 7]);
            run(blue, &visible)
        });
        (steady.join().unwrap(), dropout.join().unwrap())
    });

    for out in &steady {
        assert!(out.status.success);
        assert!(!out.status.frozen);
        assert_close(*out.image.get_pixel(320, 300), [230, 20, 20, 255]);
    }

    // Smoothed confidence is below the gate from the fifth frame on.
    let last_live = dropout.iter().rposition(|out| !out.status.frozen).unwrap();
    assert!(last_live < 4);
    for out in &dropout[4..] {
        assert!(out.status.success);
        assert!(out.status.frozen);
        assert_eq!(out.image, dropout[last_live].image);
        assert_close(*out.image.get_pixel(320, 300), [20, 20, 230, 255]);
    }
}
