use tbsync::logging::{self, LoggingError};
use tbsync::LogLevel;

#[test]
fn levels_parse_case_insensitively() {
    assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
    assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert_eq!(" trace ".parse::<LogLevel>().unwrap(), LogLevel::Trace);
    assert!(matches!(
        "verbose".parse::<LogLevel>(),
        Err(LoggingError::UnknownLevel(_))
    ));
}

#[test]
fn levels_display_as_filter_directives() {
    assert_eq!(LogLevel::Debug.to_string(), "debug");
    assert_eq!(LogLevel::Error.as_str(), "error");
    assert!(LogLevel::Trace < LogLevel::Error);
}

#[test]
fn second_init_reports_an_error() {
    logging::init(LogLevel::Warn).unwrap();
    assert!(matches!(
        logging::init(LogLevel::Warn),
        Err(LoggingError::Init(_))
    ));
}
