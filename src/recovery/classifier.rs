use std::fmt;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ApiError,
    Timeout,
    NetworkError,
    PermissionDenied,
    InvalidInput,
    ConfigurationError,
    UnknownError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        Self::ApiError,
        Self::Timeout,
        Self::NetworkError,
        Self::PermissionDenied,
        Self::InvalidInput,
        Self::ConfigurationError,
        Self::UnknownError,
    ];

    /// Transient kinds the scheduler may retry without a human.
    /// Unknown errors are retried optimistically.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ApiError | Self::Timeout | Self::NetworkError | Self::UnknownError
        )
    }

    pub fn requires_human(self) -> bool {
        !self.is_retryable()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiError => "API_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|k| k.as_str() == normalized)
    }

    /// What an operator should look at when this kind is refused.
    pub fn operator_hint(self) -> &'static str {
        match self {
            Self::PermissionDenied => "check credentials, API key and file permissions",
            Self::InvalidInput => "inspect the task instruction and input files",
            Self::ConfigurationError => "check agent command, PATH and environment variables",
            Self::ApiError => "wait for API quota or rate limits to reset",
            Self::Timeout => "check whether the task is too large for one agent run",
            Self::NetworkError => "check network connectivity",
            Self::UnknownError => "inspect logs/agent.log",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered rules; the first matching kind wins.
const RULES: &[(ErrorKind, &str)] = &[
    (
        ErrorKind::ApiError,
        r"rate[ _-]?limit|too many requests|\b429\b|quota|overloaded|\b529\b|api[ _]error|\b50[023]\b|internal server error|service unavailable",
    ),
    (
        ErrorKind::Timeout,
        r"time[ d_-]?out|timed out|deadline exceeded",
    ),
    (
        ErrorKind::NetworkError,
        r"connection (refused|reset|closed|aborted)|econn(refused|reset)|network|could not resolve|name resolution|dns|host unreachable|no route to host|broken pipe|socket",
    ),
    (
        ErrorKind::PermissionDenied,
        r"permission denied|access denied|unauthori[sz]ed|forbidden|\b40[13]\b|eacces|authentication|invalid api[ _-]?key|not permitted",
    ),
    (
        ErrorKind::InvalidInput,
        r"invalid (input|argument|request|json|format)|malformed|parse error|failed to parse|syntax error|bad request|\b400\b|unexpected token",
    ),
    (
        ErrorKind::ConfigurationError,
        r"config|not configured|missing (environment|env|setting)|environment variable|command not found|not installed|no such file or directory",
    ),
];

static COMPILED_RULES: OnceLock<Vec<(ErrorKind, Regex)>> = OnceLock::new();

fn compiled_rules() -> &'static [(ErrorKind, Regex)] {
    COMPILED_RULES.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(kind, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|re| (*kind, re))
            })
            .collect()
    })
}

/// Map raw failure text to an error kind. Total and deterministic.
pub fn classify(raw: &str) -> ErrorKind {
    if raw.trim().is_empty() {
        return ErrorKind::UnknownError;
    }
    compiled_rules()
        .iter()
        .find(|(_, re)| re.is_match(raw))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::UnknownError)
}

/// Classify an agent exit, falling back to shell exit-code conventions when
/// the output text is not recognized.
pub fn classify_exit(exit_code: Option<i32>, stderr: &str) -> ErrorKind {
    let by_text = classify(stderr);
    if by_text != ErrorKind::UnknownError {
        return by_text;
    }
    match exit_code {
        Some(124) => ErrorKind::Timeout,
        Some(126) | Some(127) => ErrorKind::ConfigurationError,
        _ => ErrorKind::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(compiled_rules().len(), RULES.len());
    }

    #[test]
    fn test_known_phrases() {
        assert_eq!(classify("rate limit exceeded"), ErrorKind::ApiError);
        assert_eq!(classify("connection refused"), ErrorKind::NetworkError);
        assert_eq!(classify("permission denied"), ErrorKind::PermissionDenied);
        assert_eq!(classify(""), ErrorKind::UnknownError);
        assert_eq!(classify("something odd happened"), ErrorKind::UnknownError);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("RATE LIMIT EXCEEDED"), ErrorKind::ApiError);
        assert_eq!(classify("Request Timed Out"), ErrorKind::Timeout);
        assert_eq!(classify("Permission Denied (os error 13)"), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both rate limit and timeout: API rule is earlier.
        assert_eq!(
            classify("rate limit hit, request timed out"),
            ErrorKind::ApiError
        );
        assert_eq!(classify("connection timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_status_codes_need_word_boundary() {
        assert_eq!(classify("HTTP 429"), ErrorKind::ApiError);
        assert_eq!(classify("HTTP 403 Forbidden"), ErrorKind::PermissionDenied);
        assert_eq!(classify("processed 14290 rows"), ErrorKind::UnknownError);
    }

    #[test]
    fn test_input_and_configuration() {
        assert_eq!(classify("malformed JSON in task file"), ErrorKind::InvalidInput);
        assert_eq!(classify("claude: command not found"), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_classify_exit_fallback() {
        assert_eq!(classify_exit(Some(124), ""), ErrorKind::Timeout);
        assert_eq!(classify_exit(Some(127), "???"), ErrorKind::ConfigurationError);
        assert_eq!(classify_exit(Some(1), ""), ErrorKind::UnknownError);
        assert_eq!(
            classify_exit(Some(124), "rate limit exceeded"),
            ErrorKind::ApiError
        );
    }

    #[test]
    fn test_retryable_partition() {
        let retryable: Vec<_> = ErrorKind::ALL
            .into_iter()
            .filter(|k| k.is_retryable())
            .collect();
        assert_eq!(
            retryable,
            vec![
                ErrorKind::ApiError,
                ErrorKind::Timeout,
                ErrorKind::NetworkError,
                ErrorKind::UnknownError
            ]
        );
        assert!(ErrorKind::PermissionDenied.requires_human());
    }

    #[test]
    fn test_parse_wire_names() {
        assert_eq!(ErrorKind::parse("timeout"), Some(ErrorKind::Timeout));
        assert_eq!(ErrorKind::parse("api-error"), Some(ErrorKind::ApiError));
        assert_eq!(ErrorKind::parse("nope"), None);
        let json = serde_json::to_string(&ErrorKind::PermissionDenied).unwrap();
        assert_eq!(json, "\"PERMISSION_DENIED\"");
    }
}
