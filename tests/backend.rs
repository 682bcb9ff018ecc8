use image::{DynamicImage, RgbImage};
use std::fs;
use std::io::Cursor;
use tbsync::backend::RUN_MANIFEST;
use tbsync::{
    BackendWriteError, FieldPath, ImageArtifact, InitRunOptions, LocalProject, MemoryProject,
    MemoryRun, ProjectRegistry, RegistryError, SeriesPoint, TrackedRun, TrackedValue,
};
use tempfile::tempdir;

fn options(custom_run_id: &str) -> InitRunOptions {
    InitRunOptions {
        custom_run_id: custom_run_id.to_string(),
        name: Some("train".into()),
        hostname: Some("worker".into()),
    }
}

fn tiny_image() -> ImageArtifact {
    ImageArtifact::from_bitmap(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        2,
        3,
        image::Rgb([10, 20, 30]),
    )))
}

#[test]
fn field_paths_normalize_slashes() {
    let root = FieldPath::new("/tensorboard/");
    assert_eq!(root.as_str(), "tensorboard");
    assert_eq!(root.join("scalar//loss/").to_string(), "tensorboard/scalar/loss");
    assert_eq!(root.join("").as_str(), "tensorboard");
    assert_eq!(FieldPath::new("").join("a").as_str(), "a");
}

#[test]
fn memory_run_tracks_series_and_values() {
    let mut run = MemoryRun::new("TB-1");
    run.append(
        "tb/scalar/loss",
        SeriesPoint::new(TrackedValue::Float(0.5)).with_step(Some(1.0)),
    )
    .unwrap();
    run.append("tb/scalar/loss", SeriesPoint::new(TrackedValue::Float(0.25)))
        .unwrap();
    run.assign("tb/text/readme", TrackedValue::Text("hello".into()))
        .unwrap();

    assert!(run.exists("tb"));
    assert!(run.exists("tb/scalar"));
    assert!(run.exists("tb/scalar/loss"));
    assert!(!run.exists("tb/scal"));
    assert!(!run.exists(""));

    let state = run.snapshot();
    let series = state.series("tb/scalar/loss").unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].step, Some(1.0));
    assert_eq!(series[1].value.as_float(), Some(0.25));
    assert_eq!(
        state.value("tb/text/readme").and_then(TrackedValue::as_text),
        Some("hello")
    );
}

#[test]
fn memory_run_rejects_type_conflicts_and_closed_writes() {
    let mut run = MemoryRun::new("TB-1");
    run.append("metric", SeriesPoint::new(TrackedValue::Float(1.0)))
        .unwrap();
    assert!(matches!(
        run.assign("metric", TrackedValue::Float(2.0)),
        Err(BackendWriteError::TypeConflict { existing: "series", .. })
    ));
    run.assign("flag", TrackedValue::Bool(true)).unwrap();
    assert!(matches!(
        run.append("flag", SeriesPoint::new(TrackedValue::Float(1.0))),
        Err(BackendWriteError::TypeConflict { existing: "bool", .. })
    ));
    assert!(matches!(
        run.assign("//", TrackedValue::Bool(true)),
        Err(BackendWriteError::EmptyPath)
    ));

    run.close().unwrap();
    assert!(matches!(
        run.assign("other", TrackedValue::Bool(false)),
        Err(BackendWriteError::Closed { .. })
    ));
    assert!(run.snapshot().closed);
}

#[test]
fn memory_run_reads_uploads_eagerly() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("graph.png");
    fs::write(&source, b"png bytes").unwrap();
    let mut run = MemoryRun::new("TB-1");
    run.upload("tb/graph/abc", &source).unwrap();
    fs::remove_file(&source).unwrap();

    let state = run.snapshot();
    let file = state.file("tb/graph/abc").unwrap();
    assert_eq!(file.name, "graph.png");
    assert_eq!(file.bytes, b"png bytes");
    assert!(matches!(
        run.upload("tb/graph/missing", &source),
        Err(BackendWriteError::Upload { .. })
    ));
}

#[test]
fn memory_project_rejects_duplicate_custom_ids() {
    let mut project = MemoryProject::new("team/project");
    let first = project.init_run(options("abc")).unwrap();
    assert_eq!(first.id(), "TB-1");
    assert!(matches!(
        project.init_run(options("abc")),
        Err(RegistryError::DuplicateRun { .. })
    ));
    project.init_run(options("def")).unwrap();

    let table = project.fetch_runs_table().unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.custom_run_ids().contains("abc"));
    assert_eq!(project.run_by_custom_id("def").unwrap().id, "TB-2");
}

#[test]
fn local_project_validates_inputs() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        LocalProject::open(dir.path(), "  ", None),
        Err(RegistryError::InvalidProject(_))
    ));
    assert!(matches!(
        LocalProject::open(dir.path(), "team/../escape", None),
        Err(RegistryError::InvalidProject(_))
    ));
    assert!(matches!(
        LocalProject::open(dir.path(), "team/project", Some(" ")),
        Err(RegistryError::EmptyApiToken)
    ));
    let project = LocalProject::open(dir.path(), "team/project", Some("token")).unwrap();
    assert_eq!(project.root(), dir.path().join("team__project"));
    assert_eq!(project.project(), "team/project");
}

#[test]
fn local_runs_are_listed_before_and_after_close() {
    let dir = tempdir().unwrap();
    let mut project = LocalProject::open(dir.path(), "demo", None).unwrap();
    let mut run = project.init_run(options("abc")).unwrap();
    assert_eq!(run.id(), "TB-1");
    assert!(project.fetch_runs_table().unwrap().custom_run_ids().contains("abc"));

    run.append(
        "tb/scalar/loss",
        SeriesPoint::new(TrackedValue::Float(0.5)).with_step(Some(2.0)),
    )
    .unwrap();
    run.append("tb/image/sample", SeriesPoint::new(TrackedValue::Image(tiny_image())))
        .unwrap();
    run.assign("tensorboard_path", TrackedValue::Text("/logs/events".into()))
        .unwrap();
    run.close().unwrap();

    let manifest_path = project.root().join("TB-1").join(RUN_MANIFEST);
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["custom_run_id"], "abc");
    assert_eq!(manifest["closed"], true);
    assert_eq!(manifest["fields"]["tensorboard_path"]["value"], "/logs/events");
    assert_eq!(manifest["fields"]["tb/scalar/loss"]["series"][0]["value"], 0.5);
    assert_eq!(manifest["fields"]["tb/scalar/loss"]["series"][0]["step"], 2.0);
    let image = manifest["fields"]["tb/image/sample"]["series"][0]["value"]["image"]
        .as_str()
        .unwrap()
        .to_string();
    let png = fs::read(project.root().join("TB-1").join(image)).unwrap();
    let decoded = ImageArtifact::decode(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (2, 3));

    assert!(matches!(
        project.init_run(options("abc")),
        Err(RegistryError::DuplicateRun { .. })
    ));
    let second = project.init_run(options("def")).unwrap();
    assert_eq!(second.id(), "TB-2");
}

#[test]
fn local_artifacts_stay_inside_the_run_directory() {
    let dir = tempdir().unwrap();
    let storage = dir.path().join("store");
    let mut project = LocalProject::open(&storage, "demo", None).unwrap();
    let mut run = project.init_run(options("abc")).unwrap();
    let tag = "tb/image/../../../../../escaped";
    run.append(tag, SeriesPoint::new(TrackedValue::Image(tiny_image())))
        .unwrap();
    run.append("tb/image/./..", SeriesPoint::new(TrackedValue::Image(tiny_image())))
        .unwrap();
    run.close().unwrap();

    assert!(!storage.join("escaped").exists());
    assert!(!dir.path().join("escaped").exists());
    assert!(!storage.join("demo").join("escaped").exists());

    let run_dir = project.root().join("TB-1");
    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join(RUN_MANIFEST)).unwrap()).unwrap();
    for field in [tag, "tb/image/./.."] {
        let image = manifest["fields"][field]["series"][0]["value"]["image"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!image.split('/').any(|segment| segment == ".." || segment == "."));
        let stored = run_dir.join(&image);
        assert!(stored.starts_with(&run_dir));
        assert!(stored.is_file(), "missing {}", stored.display());
    }
}

#[test]
fn jpeg_payloads_decode_into_artifacts() {
    let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 5, image::Rgb([200, 10, 10])));
    let mut encoded = Cursor::new(Vec::new());
    bitmap
        .write_to(&mut encoded, image::ImageOutputFormat::Jpeg(90))
        .unwrap();
    let decoded = ImageArtifact::decode(encoded.get_ref()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (4, 5));
}
