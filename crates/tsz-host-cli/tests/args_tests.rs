use super::*;
use std::io::Write;

fn parse(args: &[&str]) -> HostArgs {
    HostArgs::try_parse_from(std::iter::once("tsz-host").chain(args.iter().copied())).unwrap()
}

#[test]
fn test_defaults_without_flags() {
    let config = parse(&[]).to_config().unwrap();
    assert_eq!(config, HostConfig::default());
}

#[test]
fn test_flags_override_defaults() {
    let args = parse(&[
        "--tsserver",
        "/opt/ts/bin/tsserver",
        "--separate-syntax",
        "--separate-diagnostics",
        "--no-cancellation",
        "--log-verbosity",
        "normal",
        "--log-dir",
        "/tmp/tsz-logs",
        "--locale",
        "fr",
        "--",
        "--disableAutomaticTypingAcquisition",
    ]);
    let config = args.to_config().unwrap();

    assert_eq!(config.tsserver, vec!["/opt/ts/bin/tsserver"]);
    assert_eq!(config.composite, CompositeServerType::SeparateSyntax);
    assert!(config.separate_diagnostics_server);
    assert!(!config.cancellation);
    assert_eq!(config.log_verbosity, LogVerbosity::Normal);
    assert_eq!(config.log_directory, Some(PathBuf::from("/tmp/tsz-logs")));
    assert_eq!(config.locale.as_deref(), Some("fr"));
    assert_eq!(config.extra_args, vec!["--disableAutomaticTypingAcquisition"]);
}

#[test]
fn test_flags_override_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "composite": "separateSyntax", "extraArgs": ["--a"], "version": "5.3.3" }}"#
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let config = parse(&["--config", path, "--syntax-only", "--", "--b"])
        .to_config()
        .unwrap();

    assert_eq!(config.composite, CompositeServerType::SyntaxOnly);
    assert_eq!(config.extra_args, vec!["--a", "--b"]);
    assert_eq!(config.version, "5.3.3");
}

#[test]
fn test_syntax_modes_conflict() {
    let result = HostArgs::try_parse_from(["tsz-host", "--separate-syntax", "--syntax-only"]);
    assert!(result.is_err());
}

#[test]
fn test_unknown_log_verbosity_is_an_error() {
    let err = parse(&["--log-verbosity", "chatty"]).to_config().unwrap_err();
    assert!(err.to_string().contains("chatty"));
}

#[test]
fn test_missing_config_file_names_the_path() {
    let err = parse(&["--config", "/nonexistent/tsz-host.json"])
        .to_config()
        .unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/tsz-host.json"));
}
