#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip_with_side_files() {
    let workspace = temp_dir("survd-backup-src");
    let workspace2 = temp_dir("survd-backup-dst");
    let out_dir = temp_dir("survd-backup-out");

    let db_bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("surveillance.sqlite3"), db_bytes).expect("write source db");
    std::fs::write(workspace.join("grade_hours.json"), "{\"PES\": 48}").expect("write grade hours");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], serde_json::json!(backup::BUNDLE_FORMAT));
    assert_eq!(manifest["dbSha256"], serde_json::json!(export.db_sha256));
    archive
        .by_name("db/surveillance.sqlite3")
        .expect("database entry in bundle");
    assert!(archive.by_name("files/schedule_solution.csv").is_err());

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.restored_files, vec!["grade_hours.json".to_string()]);

    let restored = std::fs::read(workspace2.join("surveillance.sqlite3")).expect("read restored db");
    assert_eq!(restored, db_bytes);
    let hours = std::fs::read_to_string(workspace2.join("grade_hours.json")).expect("restored hours");
    assert!(hours.contains("PES"));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected() {
    let workspace = temp_dir("survd-backup-tamper-src");
    let target = temp_dir("survd-backup-tamper-dst");
    let out_dir = temp_dir("survd-backup-tamper-out");
    std::fs::write(workspace.join("surveillance.sqlite3"), b"original").expect("write db");
    let bundle = out_dir.join("bundle.zip");
    backup::export_workspace_bundle(&workspace, &bundle).expect("export bundle");

    // Rewrite the bundle with a different database but the old manifest.
    let mut manifest = String::new();
    {
        let mut archive = zip::ZipArchive::new(File::open(&bundle).expect("open")).expect("zip");
        archive
            .by_name("manifest.json")
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read manifest");
    }
    let tampered = out_dir.join("tampered.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&tampered).expect("create tampered"));
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(manifest.as_bytes()).expect("write manifest");
        zip.start_file("db/surveillance.sqlite3", opts).expect("db entry");
        zip.write_all(b"swapped").expect("write db");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&tampered, &target).expect_err("checksum mismatch");
    assert!(format!("{err:#}").contains("checksum"));
    assert!(!target.join("surveillance.sqlite3").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(target);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_sqlite_file_is_accepted_and_garbage_is_not() {
    let src_dir = temp_dir("survd-backup-bare-src");
    let target = temp_dir("survd-backup-bare-dst");

    let bare = src_dir.join("copy.sqlite3");
    let mut payload = b"SQLite format 3\0".to_vec();
    payload.extend_from_slice(&[0u8; 84]);
    std::fs::write(&bare, &payload).expect("write bare db");
    let import = backup::import_workspace_bundle(&bare, &target).expect("import bare sqlite");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    assert_eq!(
        std::fs::read(target.join("surveillance.sqlite3")).expect("restored"),
        payload
    );

    let junk = src_dir.join("notes.txt");
    std::fs::write(&junk, "not a database at all").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, &target).is_err());

    let _ = std::fs::remove_dir_all(src_dir);
    let _ = std::fs::remove_dir_all(target);
}
