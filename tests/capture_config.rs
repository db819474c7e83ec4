use std::sync::Mutex;

use tempfile::NamedTempFile;

use framegrab::config::CaptureConfig;
use framegrab::SourceKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAMEGRAB_CONFIG",
        "FRAMEGRAB_SOURCE",
        "FRAMEGRAB_SAVE_DIR",
        "FRAMEGRAB_STREAM_URL",
        "FRAMEGRAB_UPLOAD_URL",
        "FRAMEGRAB_IMAGE_FIELD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "live",
        "save_dir": "/var/lib/framegrab/images",
        "stream": { "url": "rtsp://camera-1:554/stream" },
        "upload": {
            "url": "https://api.example.com/captures",
            "image_field": "photo",
            "metadata": { "product_name": "widget-a", "session_name": "shift-1" },
            "headers": { "x-api-key": "secret", "x-workspace-id": "ws-9" }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAMEGRAB_CONFIG", file.path());
    std::env::set_var("FRAMEGRAB_STREAM_URL", "rtsp://camera-2:554/stream");
    std::env::set_var("FRAMEGRAB_IMAGE_FIELD", "image_file");

    let cfg = CaptureConfig::load(None).expect("load config");

    assert_eq!(cfg.source, SourceKind::Live);
    assert_eq!(
        cfg.save_dir,
        std::path::PathBuf::from("/var/lib/framegrab/images")
    );
    // Env wins over the file.
    assert_eq!(cfg.stream_url, "rtsp://camera-2:554/stream");
    let upload = cfg.upload.expect("upload settings");
    assert_eq!(upload.url, "https://api.example.com/captures");
    assert_eq!(upload.image_field, "image_file");
    assert_eq!(upload.metadata["product_name"], "widget-a");
    assert_eq!(upload.headers["x-api-key"], "secret");

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CaptureConfig::load(None).expect("load config");

    assert_eq!(cfg.source, SourceKind::Still);
    assert_eq!(cfg.save_dir, std::path::PathBuf::from("./images"));
    assert!(cfg.upload.is_none());

    clear_env();
}

#[test]
fn env_alone_can_configure_an_upload_endpoint() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEGRAB_UPLOAD_URL", "http://127.0.0.1:9000/upload");

    let cfg = CaptureConfig::load(None).expect("load config");
    let upload = cfg.upload.expect("upload settings");
    assert_eq!(upload.url, "http://127.0.0.1:9000/upload");
    assert_eq!(upload.image_field, "image_file");

    clear_env();
}

#[test]
fn live_source_requires_a_stream_url() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEGRAB_SOURCE", "live");

    let err = CaptureConfig::load(None).expect_err("missing stream url");
    assert!(err.to_string().contains("stream url"));

    clear_env();
}
