//! Error classification into the stream error taxonomy

use super::provider::ProviderError;
use cmux_session::StreamErrorType;

/// Classify a provider failure.
///
/// Structured fields (code, provider error type, HTTP status) win over the
/// message text; the message is only consulted when they are inconclusive.
pub fn classify_provider_error(error: &ProviderError) -> StreamErrorType {
    classify_code(error.code.as_deref())
        .or_else(|| classify_type(error.error_type.as_deref()))
        .or_else(|| classify_status(error.status_code, &error.message))
        .unwrap_or_else(|| classify_message(&error.message))
}

fn classify_code(code: Option<&str>) -> Option<StreamErrorType> {
    match code? {
        "insufficient_quota" => Some(StreamErrorType::Quota),
        "context_length_exceeded" => Some(StreamErrorType::ContextExceeded),
        "model_not_found" => Some(StreamErrorType::ModelNotFound),
        "rate_limit_exceeded" => Some(StreamErrorType::RateLimit),
        "invalid_api_key" => Some(StreamErrorType::Authentication),
        _ => None,
    }
}

fn classify_type(error_type: Option<&str>) -> Option<StreamErrorType> {
    match error_type? {
        "authentication_error" | "permission_error" => Some(StreamErrorType::Authentication),
        "rate_limit_error" => Some(StreamErrorType::RateLimit),
        "overloaded_error" | "api_error" | "server_error" => Some(StreamErrorType::ServerError),
        "not_found_error" => Some(StreamErrorType::ModelNotFound),
        "insufficient_quota" => Some(StreamErrorType::Quota),
        "request_too_large" => Some(StreamErrorType::ContextExceeded),
        "retry_error" => Some(StreamErrorType::RetryFailed),
        "abort_error" => Some(StreamErrorType::Aborted),
        _ => None,
    }
}

fn classify_status(status: Option<u16>, message: &str) -> Option<StreamErrorType> {
    match status? {
        401 | 403 => Some(StreamErrorType::Authentication),
        404 => Some(StreamErrorType::ModelNotFound),
        413 => Some(StreamErrorType::ContextExceeded),
        429 => {
            if message.to_lowercase().contains("quota") {
                Some(StreamErrorType::Quota)
            } else {
                Some(StreamErrorType::RateLimit)
            }
        }
        500..=599 => Some(StreamErrorType::ServerError),
        _ => None,
    }
}

/// Best-effort classification from free-form error text
pub fn classify_message(message: &str) -> StreamErrorType {
    let m = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));
    // status codes only count as standalone numbers, never inside "5000ms"
    let status = |codes: &[&str]| {
        m.split(|c: char| !c.is_ascii_digit())
            .any(|token| codes.iter().any(|code| *code == token))
    };

    if any(&["aborted", "cancelled", "canceled"]) {
        StreamErrorType::Aborted
    } else if any(&[
        "context length",
        "context window",
        "maximum context",
        "prompt is too long",
        "too many tokens",
        "context_length_exceeded",
    ]) {
        StreamErrorType::ContextExceeded
    } else if any(&["insufficient_quota", "quota", "credit balance", "billing"]) {
        StreamErrorType::Quota
    } else if any(&["rate limit", "rate_limit", "too many requests"]) || status(&["429"]) {
        StreamErrorType::RateLimit
    } else if any(&["api key", "api_key", "unauthorized", "authentication"]) || status(&["401"])
    {
        StreamErrorType::Authentication
    } else if m.contains("model") && any(&["not found", "does not exist", "not_found"]) {
        StreamErrorType::ModelNotFound
    } else if any(&["max retries", "retries exhausted"])
        || (m.contains("retry") && m.contains("fail"))
    {
        StreamErrorType::RetryFailed
    } else if any(&[
        "overloaded",
        "internal server error",
        "bad gateway",
        "service unavailable",
    ]) || status(&["500", "502", "503"])
    {
        StreamErrorType::ServerError
    } else if any(&[
        "network",
        "econnreset",
        "econnrefused",
        "fetch failed",
        "connection",
        "timed out",
        "timeout",
        "socket",
    ]) {
        StreamErrorType::Network
    } else {
        StreamErrorType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_fields_win_over_message() {
        // Message mentions a network problem but the code says quota
        let error = ProviderError::new("connection closed after quota check")
            .with_code("insufficient_quota");
        assert_eq!(classify_provider_error(&error), StreamErrorType::Quota);

        let error = ProviderError::new("something odd").with_type("overloaded_error");
        assert_eq!(classify_provider_error(&error), StreamErrorType::ServerError);
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (401, StreamErrorType::Authentication),
            (404, StreamErrorType::ModelNotFound),
            (429, StreamErrorType::RateLimit),
            (503, StreamErrorType::ServerError),
        ];
        for (status, expected) in cases {
            let error = ProviderError::new("request failed").with_status(status);
            assert_eq!(classify_provider_error(&error), expected, "status {}", status);
        }

        let quota = ProviderError::new("You exceeded your current quota").with_status(429);
        assert_eq!(classify_provider_error(&quota), StreamErrorType::Quota);
    }

    #[test]
    fn test_message_fallback_is_case_insensitive() {
        assert_eq!(
            classify_message("Prompt Is Too Long: 210000 tokens"),
            StreamErrorType::ContextExceeded
        );
        assert_eq!(classify_message("Rate limit reached"), StreamErrorType::RateLimit);
        assert_eq!(
            classify_message("Missing API key for provider anthropic"),
            StreamErrorType::Authentication
        );
        assert_eq!(
            classify_message("model gpt-9 does not exist"),
            StreamErrorType::ModelNotFound
        );
        assert_eq!(
            classify_message("Failed after 3 attempts. Last error: retry failed"),
            StreamErrorType::RetryFailed
        );
        assert_eq!(classify_message("fetch failed: ECONNRESET"), StreamErrorType::Network);
        assert_eq!(classify_message("The operation was aborted"), StreamErrorType::Aborted);
    }

    #[test]
    fn test_status_codes_in_text_match_whole_numbers_only() {
        assert_eq!(
            classify_message("Request timed out after 5000ms"),
            StreamErrorType::Network
        );
        assert_eq!(
            classify_message("socket closed after 14290 bytes"),
            StreamErrorType::Network
        );
        assert_eq!(classify_message("upstream returned 503"), StreamErrorType::ServerError);
        assert_eq!(classify_message("HTTP 429: slow down"), StreamErrorType::RateLimit);
        assert_eq!(classify_message("status=401"), StreamErrorType::Authentication);
        assert_eq!(classify_message("read 4010 records"), StreamErrorType::Unknown);
    }

    #[test]
    fn test_unknown_default() {
        assert_eq!(classify_message("something unexpected"), StreamErrorType::Unknown);
        assert_eq!(
            classify_provider_error(&ProviderError::new("weird").with_status(418)),
            StreamErrorType::Unknown
        );
    }
}
