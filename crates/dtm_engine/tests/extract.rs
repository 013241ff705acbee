use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use dtm_core::TileRecord;
use dtm_engine::{
    unpack_archive, verify_extraction, ArchiveWorker, FetchFailure, FetchSettings, ProgressEvent,
    ProgressSink, TileProgress, TileStatus, TileWorker,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Default)]
struct TestSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl TestSink {
    fn tile_events(&self) -> Vec<TileProgress> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::TileProgress(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn build_archive() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    writer.add_directory("tiles/", options).unwrap();
    writer.start_file("tiles/a.tif", options).unwrap();
    writer.write_all(&[7u8; 512]).unwrap();
    writer.start_file("readme.txt", options).unwrap();
    writer.write_all(b"metadata").unwrap();
    writer.start_file("../evil.tif", options).unwrap();
    writer.write_all(b"escape").unwrap();

    writer.finish().unwrap().into_inner()
}

fn write_archive(dir: &Path) -> std::path::PathBuf {
    let archive = dir.join("tile.zip");
    std::fs::write(&archive, build_archive()).unwrap();
    archive
}

#[test]
fn unpack_returns_rasters_and_rejects_escaping_entries() {
    let root = tempfile::tempdir().unwrap();
    let archive = write_archive(root.path());
    let destination = root.path().join("out").join("tile");
    let sink = TestSink::default();

    let rasters = unpack_archive(&archive, &destination, "Tile", &sink).unwrap();

    assert_eq!(rasters, vec![destination.join("tiles").join("a.tif")]);
    assert!(destination.join("readme.txt").is_file());
    assert!(destination.join("tiles").is_dir());
    assert!(!root.path().join("out").join("evil.tif").exists());

    let events = sink.tile_events();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.status == TileStatus::Extracting));
    assert!(events.iter().all(|e| e.bytes_total == 4));
    assert_eq!(
        events.iter().map(|e| e.bytes_done).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
}

#[test]
fn verification_detects_complete_and_partial_extractions() {
    let root = tempfile::tempdir().unwrap();
    let archive = write_archive(root.path());
    let destination = root.path().join("x");

    assert!(verify_extraction(&archive, &destination).is_none());
    unpack_archive(&archive, &destination, "Tile", &TestSink::default()).unwrap();
    assert_eq!(
        verify_extraction(&archive, &destination),
        Some(vec![destination.join("tiles").join("a.tif")])
    );

    std::fs::write(destination.join("tiles").join("a.tif"), b"short").unwrap();
    assert!(verify_extraction(&archive, &destination).is_none());
}

#[test]
fn garbage_archive_is_corrupt() {
    let root = tempfile::tempdir().unwrap();
    let archive = root.path().join("bad.zip");
    std::fs::write(&archive, b"this is not a zip file").unwrap();

    let err = unpack_archive(&archive, &root.path().join("o"), "Bad", &TestSink::default())
        .unwrap_err();
    assert_eq!(err.kind, FetchFailure::ArchiveCorrupt);
}

#[tokio::test]
async fn worker_downloads_then_extracts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pkg/tile.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(build_archive()))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let worker = ArchiveWorker::new(FetchSettings::default(), root.path().join("archives")).unwrap();
    let tile = TileRecord::new("GTA 2023", "GTA-2023-A")
        .with_source_url(format!("{}/pkg/tile.zip", server.uri()));
    let destination = root.path().join("extracts").join(tile.cache_key());
    let sink = Arc::new(TestSink::default());

    let rasters = worker
        .run(&tile, &destination, sink.clone())
        .await
        .expect("worker ok");

    assert_eq!(rasters, vec![destination.join("tiles").join("a.tif")]);
    assert!(worker.archive_path(&tile).is_file());

    let statuses: Vec<TileStatus> = sink.tile_events().iter().map(|e| e.status).collect();
    let completed = statuses
        .iter()
        .position(|s| *s == TileStatus::Completed)
        .unwrap();
    let first_extract = statuses
        .iter()
        .position(|s| *s == TileStatus::Extracting)
        .unwrap();
    assert!(completed < first_extract);
}

#[tokio::test]
async fn corrupt_cached_archive_is_downloaded_again() {
    dtm_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let body = build_archive();
    Mock::given(method("HEAD"))
        .and(path("/pkg/stale.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pkg/stale.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let worker = ArchiveWorker::new(FetchSettings::default(), root.path().join("archives")).unwrap();
    let tile = TileRecord::new("GTA 2023", "GTA-2023-S")
        .with_source_url(format!("{}/pkg/stale.zip", server.uri()));
    let destination = root.path().join("extracts").join(tile.cache_key());
    let archive = worker.archive_path(&tile);
    std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
    std::fs::write(&archive, vec![0u8; body.len()]).unwrap();

    let err = worker
        .run(&tile, &destination, Arc::new(TestSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchFailure::ArchiveCorrupt);
    assert!(!archive.exists());

    let rasters = worker
        .run(&tile, &destination, Arc::new(TestSink::default()))
        .await
        .expect("second run downloads a fresh archive");
    assert_eq!(rasters, vec![destination.join("tiles").join("a.tif")]);
    assert_eq!(std::fs::read(&archive).unwrap(), body);
}

#[tokio::test]
async fn worker_rejects_tile_without_url() {
    let root = tempfile::tempdir().unwrap();
    let worker = ArchiveWorker::new(FetchSettings::default(), root.path().to_path_buf()).unwrap();
    let tile = TileRecord::new("GTA", "no-url");

    let err = worker
        .run(&tile, root.path(), Arc::new(TestSink::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FetchFailure::NetworkFailure);
}
