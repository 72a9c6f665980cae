use std::io::Write;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};
use twopence::config::{Config, TargetConfig};
use twopence::error::format_error;
use twopence::iostream::{BufferStream, LocalStream};
use twopence::ssh::{parse_target, SshTarget};
use twopence::{strerror, Error, OutputChannel, OutputMode, Sink};

#[test]
fn test_error_strings() {
    assert_eq!(strerror(Error::CommandTimeout.code()), "Remote command took too long to execute");
    assert_eq!(strerror(-15), strerror(Error::CommandTimeout.code()));
    assert_eq!(strerror(0), "Unknown error");
    assert_eq!(strerror(-16), "Unknown error");
    assert_eq!(
        format_error("Unable to initialize target", Error::UnknownPlugin),
        "Unable to initialize target: Unknown plugin."
    );
}

#[test]
fn test_ssh_target_specs() {
    assert_eq!(parse_target("sut"), Some(("sut".to_string(), 22)));
    assert_eq!(parse_target("sut:2222"), Some(("sut".to_string(), 2222)));
    assert_eq!(parse_target("[::1]:22"), Some(("::1".to_string(), 22)));
    assert_eq!(parse_target("sut:65535"), None);
    assert_eq!(parse_target("sut:-1"), None);

    let target = SshTarget::init("192.168.122.10:2022").unwrap();
    assert_eq!(target.host(), "192.168.122.10");
    assert_eq!(target.port(), 2022);
    assert!(SshTarget::init("sut:abc").is_none());
}

#[test]
fn test_sink_modes() {
    let mut sink = Sink::buffer_separately(3);
    assert_eq!(sink.write(OutputChannel::Stdout, b"hello"), 3);
    assert_eq!(sink.write(OutputChannel::Stderr, b"ok"), 2);
    assert_eq!(sink.stdout_bytes(), b"hel");
    assert_eq!(sink.stderr_bytes(), b"ok");

    let mut sink = Sink::buffer(4);
    sink.write(OutputChannel::Stdout, b"ab");
    sink.write(OutputChannel::Stderr, b"cd");
    assert!(!sink.putc(OutputChannel::Stdout, b'e'));
    assert_eq!(sink.stdout_bytes(), b"abcd");

    let sink = Sink::new(OutputMode::Buffer, 0);
    assert_eq!(sink.mode(), OutputMode::None);
}

#[test]
fn test_file_stream_size_and_contents() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"twelve bytes").unwrap();

    let mut stream = LocalStream::from(file.reopen().unwrap());
    assert_eq!(stream.filesize(), Some(12));
    assert!(stream.poll_fd().is_some());

    let mut buffered = stream.read_all().unwrap();
    assert!(stream.is_eof());
    assert!(stream.poll_fd().is_none());
    assert_eq!(buffered.filesize(), Some(12));

    let mut buf = [0u8; 32];
    let n = buffered.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"twelve bytes");
    assert!(buffered.is_eof());
}

#[test]
fn test_shared_buffer_stream() {
    let buffer = BufferStream::with_limit(8);
    let mut out = LocalStream::from(buffer.clone());
    let mut err = LocalStream::from(buffer.clone());
    out.write_all(b"out ").unwrap();
    err.write_all(b"err more").unwrap();
    assert_eq!(buffer.contents(), b"out err ");
}

#[test]
fn test_config_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("twopence").join("config.yml");

    let missing = Config::load_from(&path).unwrap();
    assert_eq!(missing, Config::default());
    assert_eq!(missing.defaults.timeout, 60);

    let mut config = Config::default();
    config.defaults.user = Some("tester".into());
    config.set_target(
        "sut".into(),
        TargetConfig::new("ssh:sut.example.com:2222").with_timeout(300),
    );
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let resolved = loaded.resolve("sut");
    assert_eq!(resolved.spec, "ssh:sut.example.com:2222");
    assert_eq!(resolved.user.as_deref(), Some("tester"));
    assert_eq!(resolved.timeout, Duration::from_secs(300));

    let literal = loaded.resolve("ssh:other");
    assert_eq!(literal.spec, "ssh:other");
    assert_eq!(literal.timeout, Duration::from_secs(60));
}

#[test]
fn test_config_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yml");
    std::fs::write(&path, "targets: [not, a, map]\n").unwrap();
    assert!(Config::load_from(&path).is_err());
}
