use url::Url;

/// Shortest check interval accepted at registration, in seconds
pub const MIN_INTERVAL_SECONDS: u64 = 10;

/// Longest check interval accepted at registration, in seconds
pub const MAX_INTERVAL_SECONDS: u64 = 86_400;

/// Validation results with specific error messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    /// Convert into a `Result` carrying the error message
    pub fn into_result(self) -> Result<(), String> {
        if self.is_valid {
            Ok(())
        } else {
            Err(self.error.unwrap_or_else(|| "Validation failed".to_string()))
        }
    }
}

/// Validate an HTTP/HTTPS monitor URL
pub fn validate_http_endpoint(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Target cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none_or(str::is_empty) {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            // If it fails to parse, check if it's missing a scheme
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate a monitor interval in seconds
pub fn validate_interval(interval_seconds: u64) -> ValidationResult {
    if interval_seconds < MIN_INTERVAL_SECONDS {
        return ValidationResult::err(format!(
            "Interval must be at least {MIN_INTERVAL_SECONDS} seconds"
        ));
    }

    if interval_seconds > MAX_INTERVAL_SECONDS {
        return ValidationResult::err("Interval too long (max 24 hours)");
    }

    ValidationResult::ok()
}
