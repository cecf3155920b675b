use crate::call::CallKey;
use crate::frame::FrameError;

/// 统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum WaitlistError {
    /// A call with the same correlation key is already pending
    #[error("Duplicate pending call: {key}")]
    DuplicateCall {
        key: CallKey,
    },

    /// The transport refused or failed to send a frame
    #[error("Transport error: {reason} (retryable: {retryable})")]
    Transport {
        reason: String,
        retryable: bool,
    },

    /// Frame encoding or decoding failed
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration was rejected by validation
    #[error("Configuration error in field '{field}': {reason}")]
    Configuration {
        field: String,
        reason: String,
    },

    /// No free token could be found for a destination/service pair
    #[error("No free token after {attempts} attempts")]
    TokensExhausted {
        attempts: usize,
    },
}

impl WaitlistError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            WaitlistError::DuplicateCall { .. } => false,
            WaitlistError::Transport { retryable, .. } => *retryable,
            WaitlistError::Frame(_) => false,
            WaitlistError::Configuration { .. } => false,
            WaitlistError::TokensExhausted { .. } => true,
        }
    }

    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            WaitlistError::DuplicateCall { .. } => "DUPLICATE_CALL",
            WaitlistError::Transport { .. } => "TRANSPORT_ERROR",
            WaitlistError::Frame(_) => "FRAME_ERROR",
            WaitlistError::Configuration { .. } => "CONFIG_ERROR",
            WaitlistError::TokensExhausted { .. } => "TOKENS_EXHAUSTED",
        }
    }

    pub fn transport_error(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Transport {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn config_error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 从标准IO错误转换
impl From<std::io::Error> for WaitlistError {
    fn from(error: std::io::Error) -> Self {
        let retryable = matches!(
            error.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
        );

        WaitlistError::Transport {
            reason: format!("IO error: {}", error),
            retryable,
        }
    }
}
