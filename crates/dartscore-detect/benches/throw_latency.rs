use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dartscore_calib::synthetic::{calibration_document, three_camera_rig};
use dartscore_calib::{CalibrationSet, TransformOptions};
use dartscore_core::from_polar;
use dartscore_detect::{DartDetector, DetectorConfig, ThrowInput, TipDetection};
use nalgebra::Vector2;

fn rig_throw(radius: f64, angle_deg: f64) -> ThrowInput {
    let tip = from_polar(radius, angle_deg);
    let leans = [
        Vector2::new(0.0, -0.3),
        Vector2::new(0.2, -0.2),
        Vector2::new(-0.25, 0.15),
    ];
    let detections = three_camera_rig()
        .iter()
        .zip(leans)
        .map(|(cam, lean)| {
            TipDetection::new(
                cam.id.as_str(),
                cam.board_to_pixel(tip + lean),
                cam.board_to_pixel(tip),
                0.85,
            )
        })
        .collect();
    ThrowInput::new(detections)
}

fn bench_calibration_fit(c: &mut Criterion) {
    let doc = calibration_document(&three_camera_rig());
    c.bench_function("calibration_fit_3cams_321pts", |b| {
        b.iter(|| {
            CalibrationSet::from_value(black_box(&doc), &TransformOptions::default()).unwrap()
        })
    });
}

fn bench_detect(c: &mut Criterion) {
    let doc = calibration_document(&three_camera_rig());
    let set = CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap();
    let detector = DartDetector::new(set, DetectorConfig::default()).unwrap();

    let three = rig_throw(0.6, 54.0);
    c.bench_function("detect_3cams", |b| {
        b.iter(|| detector.detect(black_box(&three)))
    });

    let mut lone = rig_throw(0.3, 200.0);
    lone.detections.truncate(1);
    c.bench_function("detect_1cam", |b| {
        b.iter(|| detector.detect(black_box(&lone)))
    });

    detector.set_flag("EmitDiagnostics", 1).unwrap();
    c.bench_function("detect_3cams_diagnostics", |b| {
        b.iter(|| detector.detect(black_box(&three)))
    });
}

fn bench_untransform(c: &mut Criterion) {
    let doc = calibration_document(&three_camera_rig());
    let set = CalibrationSet::from_value(&doc, &TransformOptions::default()).unwrap();
    let Some(cam) = set.get("cam0") else {
        return;
    };
    let p = from_polar(0.7, 123.0);
    c.bench_function("untransform_newton", |b| {
        b.iter(|| cam.untransform(black_box(p)))
    });
}

criterion_group!(
    throw_latency,
    bench_calibration_fit,
    bench_detect,
    bench_untransform
);
criterion_main!(throw_latency);
