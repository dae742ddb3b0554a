use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use cubelink::config::Config;

#[test]
fn test_config_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[daemon]
socket_path = "/run/cube/daemon.sock"
request_timeout_secs = 5.0

[facade]
workers = 2

[speaker]
tts_command = ["say"]

[logging]
format = "json"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.daemon.socket_path, PathBuf::from("/run/cube/daemon.sock"));
    assert_eq!(config.daemon.request_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.facade.workers, 2);
    assert_eq!(config.speaker.tts_command, vec!["say".to_string()]);
    assert_eq!(config.speaker.tone_sample_rate, 16000);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.logging.level, "info");

    println!("Config File Passed");
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.facade.socket_path, PathBuf::from("/tmp/foundry_python_service.sock"));
    assert_eq!(config.daemon.transport().max_in_flight, 1024);
    assert!(!config.voice.engines_configured());

    println!("Missing Config Passed");
}

#[test]
fn test_invalid_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[facade]\nworkers = \"many\"").unwrap();
    assert!(Config::load(file.path()).is_err());

    println!("Invalid Config Passed");
}

#[test]
fn test_voice_engines_come_from_the_voice_section() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[voice]
wake_word_command = ["/opt/cube/wake", "--model", "hey_cube"]
recognizer_command = ["/opt/cube/recognise"]
rebuild_every = 2
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert!(config.voice.engines_configured());
    assert_eq!(config.voice.wake_word_command.len(), 3);
    assert_eq!(config.voice.recognizer_command, vec!["/opt/cube/recognise".to_string()]);
    assert_eq!(config.voice.rebuild_every, 2);
    assert_eq!(config.voice.sample_rate, 16000);

    println!("Voice Config Passed");
}
