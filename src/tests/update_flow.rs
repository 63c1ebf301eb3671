use std::fs;
use std::path::Path;
use std::time::Duration;

use updater_core::{
    Phase, Platform, SystemClock, Timeouts, UpdateOrchestrator, UpdateStatus, UpdaterConfig,
    VersionDescriptor,
};

use super::support::{serve, Reply, TestServer};
use crate::indicator::LogIndicator;
use crate::network::TcpTransport;
use crate::ota::{FileImageSink, OtaManager};
use crate::storage::FsStorage;

type HostOrchestrator = UpdateOrchestrator<
    TcpTransport,
    FsStorage,
    OtaManager<TcpTransport, LogIndicator, SystemClock, FileImageSink>,
    LogIndicator,
    SystemClock,
>;

fn orchestrator(server: &TestServer, root: &Path) -> HostOrchestrator {
    let timeouts = Timeouts {
        connect_ms: 1000,
        response_ms: 300,
    };
    let config = UpdaterConfig {
        connect_retries: 1,
        timeouts,
        ..UpdaterConfig::new("127.0.0.1", "/fw/app.bin", server.port)
    };
    let firmware = OtaManager::new(
        TcpTransport::new(),
        LogIndicator::new(),
        SystemClock::new(),
        FileImageSink::new(root.join("firmware.bin")),
    )
    .with_timeouts(timeouts, 1);

    UpdateOrchestrator::new(
        config,
        VersionDescriptor::new(1, 0, 0, 0),
        Platform {
            transport: TcpTransport::new(),
            storage: FsStorage::new(root.join("spiffs")),
            firmware,
            indicator: LogIndicator::new(),
            clock: SystemClock::new(),
        },
    )
}

fn descriptor(version: &str, format: bool, files: &[&str]) -> String {
    let v: Vec<&str> = version.split('.').collect();
    let list: Vec<String> = files.iter().map(|f| format!("\"{}\"", f)).collect();
    format!(
        "{{\n  \"v1\": {},\n  \"v2\": {},\n  \"v3\": {},\n  \"v4\": {},\n  \"SPIFFS_format\": {},\n  \"SPIFFS_update_files\": [{}]\n}}\n",
        v[0],
        v[1],
        v[2],
        v[3],
        u8::from(format),
        list.join(", ")
    )
}

#[test]
fn test_full_update_stages_files_then_firmware() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("spiffs")).unwrap();
    fs::write(dir.path().join("spiffs/stale.txt"), b"old").unwrap();

    let server = serve(vec![
        Reply::text(&descriptor("1.0.1.0", true, &["/index.html", "/css/site.css"])),
        Reply::text("<html>v1.0.1</html>"),
        Reply::text("body { color: red }"),
        Reply::ok(&[0xE9; 2048]),
    ]);
    let mut ota = orchestrator(&server, dir.path());

    assert_eq!(ota.run_update(), UpdateStatus::Ok);
    assert_eq!(ota.phase(), Phase::Idle);
    assert_eq!(
        server.paths(),
        [
            "/fw/app.bin.version.json",
            "/fw/index.html",
            "/fw/css/site.css",
            "/fw/app.bin"
        ]
    );

    let spiffs = dir.path().join("spiffs");
    assert!(!spiffs.join("stale.txt").exists());
    assert_eq!(fs::read(spiffs.join("index.html")).unwrap(), b"<html>v1.0.1</html>");
    assert_eq!(fs::read(spiffs.join("css/site.css")).unwrap(), b"body { color: red }");
    assert_eq!(fs::read(dir.path().join("firmware.bin")).unwrap(), vec![0xE9; 2048]);
}

#[test]
fn test_same_version_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(vec![Reply::text(&descriptor("1.0.0.0", true, &["/index.html"]))]);
    let mut ota = orchestrator(&server, dir.path());

    assert!(!ota.check_for_update(120));
    assert_eq!(ota.run_update(), UpdateStatus::NoUpdates);
    assert_eq!(server.paths(), ["/fw/app.bin.version.json"]);
    assert!(!dir.path().join("firmware.bin").exists());
}

#[test]
fn test_truncated_file_leaves_firmware_alone() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(vec![
        Reply::text(&descriptor("2.0.0.0", false, &["/a.txt", "/b.txt"])),
        Reply::text("complete"),
        Reply::truncated(b"part", 64),
        Reply::ok(b"firmware"),
    ]);
    let mut ota = orchestrator(&server, dir.path());

    assert_eq!(ota.run_update(), UpdateStatus::StorageStagingFailure);
    assert_eq!(
        server.paths(),
        ["/fw/app.bin.version.json", "/fw/a.txt", "/fw/b.txt"]
    );
    let spiffs = dir.path().join("spiffs");
    assert_eq!(fs::read(spiffs.join("a.txt")).unwrap(), b"complete");
    assert!(!spiffs.join("b.txt").exists());
    assert!(!dir.path().join("firmware.bin").exists());
}

#[test]
fn test_stalled_file_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(vec![
        Reply::text(&descriptor("1.1.0.0", false, &["/big.bin"])),
        Reply::truncated(b"0123", 4096).then_stall(Duration::from_secs(2)),
    ]);
    let mut ota = orchestrator(&server, dir.path());

    assert_eq!(ota.run_update(), UpdateStatus::StorageStagingFailure);
    assert!(!dir.path().join("spiffs/big.bin").exists());
}

#[test]
fn test_unreachable_server_reports_no_such_site() {
    let dir = tempfile::tempdir().unwrap();
    // nothing listens on the port once the listener is dropped
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let server = TestServer::detached(port);
    let mut ota = orchestrator(&server, dir.path());

    assert!(!ota.check_for_update(120));
    assert_eq!(ota.candidate_version().status, UpdateStatus::NoSuchSite);
    assert!(ota.candidate_version().is_unknown());
}

#[test]
fn test_firmware_not_modified_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(vec![
        Reply::text(&descriptor("1.0.0.1", false, &[])),
        Reply::status(304),
    ]);
    let mut ota = orchestrator(&server, dir.path());

    assert_eq!(ota.run_update(), UpdateStatus::NoUpdates);
    assert_eq!(server.paths(), ["/fw/app.bin.version.json", "/fw/app.bin"]);
}

#[test]
fn test_file_outside_storage_root_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let server = serve(vec![
        Reply::text(&descriptor("1.0.2.0", false, &["/../escaped.txt"])),
        Reply::text("outside"),
        Reply::ok(b"firmware"),
    ]);
    let mut ota = orchestrator(&server, dir.path());

    assert_eq!(ota.run_update(), UpdateStatus::StorageStagingFailure);
    assert!(!dir.path().join("escaped.txt").exists());
    assert!(!dir.path().join("firmware.bin").exists());
    assert!(!server.paths().iter().any(|p| p == "/fw/app.bin"));
}
