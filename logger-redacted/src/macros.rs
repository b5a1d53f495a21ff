// Logging macros

/// `tracing::warn!` with the free-text `error` field passed through a redactor
#[macro_export]
macro_rules! redacted_warn {
    ($redactor:expr, $error:expr, $($arg:tt)+) => {
        tracing::warn!(error = %$redactor.redact(&$error.to_string()), $($arg)+)
    };
}

#[macro_export]
macro_rules! redacted_error {
    ($redactor:expr, $error:expr, $($arg:tt)+) => {
        tracing::error!(error = %$redactor.redact(&$error.to_string()), $($arg)+)
    };
}
