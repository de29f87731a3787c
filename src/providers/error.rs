use std::fmt;

/// A classified provider failure. The kind decides the retry policy;
/// `status` and `message` preserve what the provider actually said.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Retry hint parsed out of a 429 response, in seconds.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider rejected our credentials (401/403).
    Auth,
    /// The provider throttled us (429); `retry_after_secs` may be set.
    RateLimit,
    /// Any other 4xx: malformed request, unknown model, exhausted quota.
    BadRequest,
    /// 408 from the provider or a deadline breach on our side.
    Timeout,
    /// Transport-level failure: DNS, refused connection, reset.
    Network,
    /// The provider fell over (5xx).
    ServerError,
    /// Anything else.
    Unknown,
}

impl ProviderErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Auth => "auth_failed",
            Self::RateLimit => "rate_limited",
            Self::BadRequest => "provider_error",
            Self::Timeout => "network",
            Self::Network => "network",
            Self::ServerError => "provider_error",
            Self::Unknown => "provider_error",
        }
    }
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            s if (400..500).contains(&s) => ProviderErrorKind::BadRequest,
            _ => ProviderErrorKind::Unknown,
        };

        let retry_after_secs = if kind == ProviderErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// A failure reported inside an otherwise healthy response stream.
    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Unknown,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Whether this error is worth retrying with the same request.
    ///
    /// Auth and non-429 4xx responses are deterministic; everything transient
    /// (rate limits, timeouts, transport failures, 5xx) is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Network
                | ProviderErrorKind::ServerError
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} provider error", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Pull a retry hint out of a 429 body. Providers disagree on where it
/// lives (nested under `error` or top-level) and on whether it is integer
/// or fractional seconds, so probe both spots and round fractions up.
fn extract_retry_after(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["/error/retry_after", "/retry_after"]
        .iter()
        .filter_map(|path| value.pointer(path))
        .find_map(|hint| {
            hint.as_u64()
                .or_else(|| hint.as_f64().map(|secs| secs.ceil() as u64))
        })
}

fn truncate_body(body: &str) -> String {
    crate::utils::truncate_str(body, 300)
}
