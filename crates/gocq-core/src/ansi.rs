//! ANSI escape code handling and gateway log-line inspection
//!
//! go-cqhttp colors its console output even when stdout is a pipe, so raw
//! lines carry escape sequences that are noise for API consumers. Its log
//! lines also follow a fixed `[time] [LEVEL]: message` layout from which the
//! severity can be recovered.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::LogLevel;

/// Regex pattern for ANSI escape sequences.
///
/// Covers:
/// - CSI sequences: ESC [ ... letter (colors, cursor, etc.)
/// - OSC sequences: ESC ] ... BEL or ST (hyperlinks, titles)
/// - Simple escapes: ESC letter
static ANSI_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-9;?]*[A-Za-z]               # CSI sequences
        | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)  # OSC sequences
        | \x1b[A-Za-z]                       # Simple escapes
        ",
    )
    .expect("ANSI regex pattern is valid")
});

/// Level tag as printed by the gateway's logger, e.g. `[2023-01-02 03:04:05] [WARNING]: ...`
static LEVEL_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[[^\]]*\]\s*)?\[(TRACE|DEBUG|INFO|WARN|WARNING|ERROR|FATAL|PANIC)\]")
        .expect("Level tag regex pattern is valid")
});

/// Strip all ANSI escape sequences from a string.
///
/// # Examples
///
/// ```
/// use gocq_core::strip_ansi_codes;
///
/// assert_eq!(strip_ansi_codes("\x1b[32mINFO\x1b[0m ready"), "INFO ready");
/// ```
pub fn strip_ansi_codes(input: &str) -> String {
    if !contains_ansi_codes(input) {
        return input.to_string();
    }
    ANSI_ESCAPE_PATTERN.replace_all(input, "").into_owned()
}

/// Check whether a string contains an escape character at all.
pub fn contains_ansi_codes(input: &str) -> bool {
    input.contains('\x1b')
}

/// Detect the severity of a gateway log line from its `[LEVEL]` tag.
///
/// Returns `None` for lines that don't follow the gateway's log layout
/// (QR-code art, panics, captcha prompts).
pub fn detect_log_level(line: &str) -> Option<LogLevel> {
    let caps = LEVEL_TAG_PATTERN.captures(line)?;
    match &caps[1] {
        "TRACE" | "DEBUG" => Some(LogLevel::Debug),
        "INFO" => Some(LogLevel::Info),
        "WARN" | "WARNING" => Some(LogLevel::Warning),
        _ => Some(LogLevel::Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_color_codes() {
        let colored = "\x1b[37m[2023-01-02 03:04:05] [INFO]: \x1b[0m登录成功";
        assert_eq!(
            strip_ansi_codes(colored),
            "[2023-01-02 03:04:05] [INFO]: 登录成功"
        );
    }

    #[test]
    fn test_strip_plain_text_unchanged() {
        assert_eq!(strip_ansi_codes("plain line"), "plain line");
        assert!(!contains_ansi_codes("plain line"));
    }

    #[test]
    fn test_strip_osc_sequence() {
        let input = "\x1b]0;go-cqhttp\x07ready";
        assert_eq!(strip_ansi_codes(input), "ready");
    }

    #[test]
    fn test_detect_level_with_timestamp() {
        assert_eq!(
            detect_log_level("[2023-01-02 03:04:05] [INFO]: 开始尝试登录并同步消息..."),
            Some(LogLevel::Info)
        );
        assert_eq!(
            detect_log_level("[2023-01-02 03:04:05] [WARNING]: 账号可能被风控"),
            Some(LogLevel::Warning)
        );
        assert_eq!(
            detect_log_level("[2023-01-02 03:04:05] [ERROR]: 登录失败"),
            Some(LogLevel::Error)
        );
        assert_eq!(
            detect_log_level("[2023-01-02 03:04:05] [FATAL]: 无法启动"),
            Some(LogLevel::Error)
        );
        assert_eq!(
            detect_log_level("[2023-01-02 03:04:05] [DEBUG]: heartbeat"),
            Some(LogLevel::Debug)
        );
    }

    #[test]
    fn test_detect_level_without_timestamp() {
        assert_eq!(detect_log_level("[WARN]: slow"), Some(LogLevel::Warning));
    }

    #[test]
    fn test_detect_level_untagged() {
        assert_eq!(detect_log_level("█▀▀▀▀▀█ ▄▄ █▀▀▀▀▀█"), None);
        assert_eq!(detect_log_level("panic: runtime error"), None);
        assert_eq!(detect_log_level("message mentioning [INFO] later"), None);
    }
}
