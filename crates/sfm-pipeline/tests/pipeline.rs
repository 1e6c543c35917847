mod common;

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};

use common::{
    FakeSetup, FallbackBehavior, MapperBehavior, RectifierBehavior, Scene, init_logging,
    stage_rows,
};
use sfm_pipeline::{
    ModelSection, ReconstructionPhase, ReconstructionResult, ReportGuard, Strategy, run_pipeline,
};

const ALL_ROWS: [&str; 7] = [
    "Retrieval",
    "Pair Selection",
    "Feature Extraction",
    "Feature Matching",
    "Reconstruction",
    "Image Undistortion",
    "Model Statistics",
];

#[test]
fn full_run_on_ten_images() {
    init_logging();
    let scene = Scene::new(10);
    let mut ctx = scene.context();
    let (tools, calls) = FakeSetup::default().build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    let pairs = ctx.state.pairs.as_ref().unwrap();
    assert!(pairs.len() <= 45, "{} pairs", pairs.len());
    assert_eq!(pairs.len(), 45);
    assert!(ctx.layout().features.is_file());
    assert!(ctx.layout().matches.is_file());
    assert!(ctx.layout().pairs.is_file());

    let model = ctx.state.reconstruction.as_ref().unwrap().model().unwrap();
    assert!(!model.is_empty());
    let rectified = fs::read_dir(ctx.layout().undistorted.join("images"))
        .unwrap()
        .count();
    assert_eq!(rectified, 10);

    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert_eq!(stage_rows(&markdown), ALL_ROWS);
    assert!(markdown.contains("| **Total** |"));
    assert!(markdown.contains("Registered images: 10"));
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.json_path.is_file());

    let stage_sum: f64 = report.stages.iter().map(|s| s.elapsed_s).sum();
    assert!(report.total_s >= stage_sum);

    let calls = calls.borrow();
    assert!(calls.contains(&"rank:25".to_string()));
    assert!(calls.contains(&"mapper:AUTO:10".to_string()));
    assert!(!calls.iter().any(|c| c.starts_with("fallback")));
}

#[test]
fn primary_failure_triggers_fallback() {
    init_logging();
    let scene = Scene::new(3);
    let mut ctx = scene.context();
    let (tools, calls) = FakeSetup {
        mapper: MapperBehavior::Fail("No good initial image pair found"),
        fallback: FallbackBehavior::Register(vec![2, 3]),
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert_eq!(
        ctx.state.reconstruction_phases,
        [
            ReconstructionPhase::Pending,
            ReconstructionPhase::Primary,
            ReconstructionPhase::FallingBack,
            ReconstructionPhase::Succeeded,
        ]
    );
    match report.reconstruction.as_ref().unwrap() {
        ReconstructionResult::Succeeded {
            model,
            strategy,
            primary_error,
        } => {
            assert_eq!(*strategy, Strategy::Fallback);
            assert_eq!(model.registered_images, 3);
            assert_eq!(model.path, ctx.layout().sfm_dir.join("1"));
            assert!(primary_error.as_ref().unwrap().contains("initial image pair"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(calls.borrow().contains(&"fallback:clean=true".to_string()));
    assert!(ctx.layout().undistorted.is_dir());
    assert_eq!(report.errors.len(), 1);

    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert_eq!(stage_rows(&markdown).len(), 7);
    assert!(markdown.contains("## Errors"));
    assert!(markdown.contains("primary reconstruction failed"));
}

#[test]
fn empty_primary_model_also_falls_back() {
    let scene = Scene::new(4);
    let mut ctx = scene.context();
    let (tools, _) = FakeSetup {
        mapper: MapperBehavior::Empty,
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();
    assert!(ctx.state.reconstruction_phases.contains(&ReconstructionPhase::FallingBack));
    assert!(report.errors[0].contains("registered no images"));
}

#[test]
fn failed_fallback_skips_undistortion() {
    init_logging();
    let scene = Scene::new(3);
    let mut ctx = scene.context();
    let (tools, calls) = FakeSetup {
        mapper: MapperBehavior::Fail("No good initial image pair found"),
        fallback: FallbackBehavior::Fail("mapper exited with code 1"),
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert_eq!(
        ctx.state.reconstruction_phases.last(),
        Some(&ReconstructionPhase::Failed)
    );
    assert!(matches!(
        report.reconstruction,
        Some(ReconstructionResult::Failed { .. })
    ));
    assert!(!ctx.layout().sfm_dir.exists());
    assert!(!ctx.layout().database.exists());
    assert!(!ctx.layout().undistorted.exists());
    assert!(!calls.borrow().iter().any(|c| c.starts_with("undistort")));

    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert_eq!(stage_rows(&markdown), ALL_ROWS[..5]);
    match &report.model_statistics {
        ModelSection::Unavailable(text) => {
            assert!(text.contains("fallback reconstruction failed"), "{text}")
        }
        other => panic!("unexpected section: {other:?}"),
    }
}

#[test]
fn stale_features_are_replaced() {
    let scene = Scene::new(5);
    fs::create_dir_all(&scene.outputs).unwrap();
    let stale = scene.outputs.join("feats-aliked-n16.h5");
    fs::write(&stale, "resize_max=1024\n").unwrap();

    let mut config = scene.config();
    config.features.resize_max = 320;
    let mut ctx = sfm_pipeline::RunContext::new(config).unwrap();
    let (tools, _) = FakeSetup::default().build();
    run_pipeline(&mut ctx, &tools).unwrap();

    assert_eq!(fs::read_to_string(&stale).unwrap(), "resize_max=320\n");
}

#[test]
fn failure_before_pairs_reports_without_model_section() {
    let scene = Scene::new(6);
    let mut ctx = scene.context();
    let (tools, calls) = FakeSetup {
        retrieval_fails: true,
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert_eq!(report.model_statistics, ModelSection::Omitted);
    assert_eq!(report.stages.len(), 1);
    assert_eq!(calls.borrow().len(), 1);
    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert_eq!(stage_rows(&markdown), ["Retrieval"]);
    assert!(!markdown.contains("## Model Statistics"));
    assert!(markdown.contains("netvlad weights not found"));
    assert!(!ctx.layout().sfm_dir.exists());
}

#[test]
fn image_name_with_spaces_fails_before_any_tool_runs() {
    let scene = Scene::new(3);
    fs::write(scene.images.join("garden view.jpg"), b"jpeg").unwrap();
    let mut ctx = scene.context();
    let (tools, calls) = FakeSetup::default().build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert!(calls.borrow().is_empty(), "{:?}", calls.borrow());
    assert_eq!(report.stages.len(), 1);
    assert!(report.errors[0].contains("garden view.jpg"), "{:?}", report.errors);
    assert_eq!(report.model_statistics, ModelSection::Omitted);
}

#[cfg(unix)]
#[test]
fn cleanup_failure_stops_the_run_before_any_stage() {
    let scene = Scene::new(3);
    let mut config = scene.config();
    // Longer than any file system allows for one path component.
    config.artifacts.features = format!("{}.h5", "f".repeat(300));
    let mut ctx = sfm_pipeline::RunContext::new(config).unwrap();
    let (tools, calls) = FakeSetup::default().build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert!(calls.borrow().is_empty());
    assert!(report.stages.is_empty());
    assert_eq!(report.model_statistics, ModelSection::Omitted);
    assert!(report.errors[0].contains("failed to remove stale artifact 'features'"));

    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert!(stage_rows(&markdown).is_empty());
    assert!(!markdown.contains("## Model Statistics"));
    assert!(markdown.contains("failed to remove stale artifacts"));
}

#[test]
fn single_image_is_insufficient() {
    let scene = Scene::new(1);
    let mut ctx = scene.context();
    let (tools, _) = FakeSetup::default().build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();
    assert_eq!(report.model_statistics, ModelSection::Omitted);
    assert!(report.errors[0].contains("at least 2 images"), "{:?}", report.errors);
}

#[test]
fn undistortion_failure_is_reported() {
    let scene = Scene::new(4);
    let mut ctx = scene.context();
    let (tools, _) = FakeSetup {
        rectifier: RectifierBehavior::Fail("CUDA out of memory"),
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();

    assert!(ctx.state.reconstruction.as_ref().unwrap().is_success());
    let markdown = fs::read_to_string(&report.markdown_path).unwrap();
    assert_eq!(stage_rows(&markdown), ALL_ROWS[..6]);
    match &report.model_statistics {
        ModelSection::Unavailable(text) => {
            assert!(text.contains("undistortion failed: CUDA out of memory"), "{text}")
        }
        other => panic!("unexpected section: {other:?}"),
    }
}

#[test]
fn rectifier_without_output_is_a_failure() {
    let scene = Scene::new(4);
    let mut ctx = scene.context();
    let (tools, _) = FakeSetup {
        rectifier: RectifierBehavior::NoOutput,
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();
    assert!(report.errors[0].starts_with("undistortion failed"), "{:?}", report.errors);
    assert!(ctx.state.model_statistics.is_none());
}

#[test]
fn analyzer_failure_becomes_statistics_text() {
    let scene = Scene::new(4);
    let mut ctx = scene.context();
    let (tools, _) = FakeSetup {
        analyzer_fails: true,
        ..FakeSetup::default()
    }
    .build();

    let report = run_pipeline(&mut ctx, &tools).unwrap();
    match &report.model_statistics {
        ModelSection::Statistics(text) => {
            assert!(text.starts_with("Error running model analyzer:"), "{text}")
        }
        other => panic!("unexpected section: {other:?}"),
    }
    assert_eq!(report.stages.len(), 7);
}

#[test]
fn guard_writes_report_when_body_panics() {
    let scene = Scene::new(2);
    let mut ctx = scene.context();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut guard = ReportGuard::new(&mut ctx);
        guard.record_error("before panic");
        panic!("stage exploded");
    }));
    assert!(outcome.is_err());

    let reports: Vec<_> = fs::read_dir(&ctx.layout().stats_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.starts_with("timing_stats_"))
        .collect();
    assert_eq!(reports.len(), 1);
    assert!(ctx.state.errors.iter().any(|e| e.contains("panic")));
}
