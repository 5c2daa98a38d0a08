use payday_core::{Activity, Amount, EngineError};
use serde::Serialize;

/// Command parsed from arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Sign in (registering on first use)
    Login {
        email: String,
        name: Option<String>,
    },
    Logout,
    /// Balance, totals and quota status
    Status,
    Perform { activity: Activity },
    Withdraw { amount: Amount },
    History { limit: Option<usize> },
    /// Push unsynced state and reconcile with the remote
    Sync,
    /// Apply any due quota resets
    ResetCheck,
}

/// Result printed for every command
#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl Response {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            result: None,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }

    /// Rejections keep their stable reason as the code.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<EngineError>().and_then(EngineError::rejection) {
            Some(rejection) => Self::error(rejection.reason(), &rejection.to_string()),
            None => Self::error("error", &format!("{:#}", err)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn render(&self, pretty: bool) -> String {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        rendered.unwrap_or_else(|e| format!(r#"{{"error":{{"code":"error","message":"{}"}}}}"#, e))
    }
}
