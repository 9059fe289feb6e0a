//! Recovery policy and the sink for recoverable errors.
use crate::error::XsltError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// What to do with a recoverable error such as an ambiguous rule match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Ignore it. Rule lookup does not even look for ambiguities.
    RecoverSilently,
    /// Log it, up to a limit.
    #[default]
    RecoverWithWarnings,
    /// Fail the transformation.
    DoNotRecover,
}

/// Receives the diagnostics a transformation raises.
pub trait ErrorListener: Send + Sync {
    /// A recoverable error. Returning `Err` aborts the transformation.
    fn warning(&self, error: XsltError) -> Result<(), XsltError>;

    /// A non-recoverable error, reported before it propagates.
    fn error(&self, error: &XsltError) {
        log::error!("Error: {}", expanded_message(error));
    }
}

/// The error's message followed by the messages of its sources.
pub fn expanded_message(error: &(dyn Error + 'static)) -> String {
    let mut message = String::new();
    let mut current = Some(error);
    while let Some(e) = current {
        let next = e.to_string();
        if !next.is_empty() && !message.ends_with(&next) {
            if !message.is_empty() {
                message.push_str(": ");
            }
            message.push_str(&next);
        }
        current = e.source();
    }
    message
}

#[derive(Debug)]
struct ListenerState {
    policy: RecoveryPolicy,
    warnings: usize,
}

/// Logs recoverable errors through the `log` facade.
///
/// After `warning_limit` warnings it announces that no more will be shown and
/// falls silent for the rest of its life.
#[derive(Debug)]
pub struct StandardErrorListener {
    state: Mutex<ListenerState>,
    warning_limit: usize,
}

impl StandardErrorListener {
    pub const DEFAULT_WARNING_LIMIT: usize = 25;

    pub fn new(policy: RecoveryPolicy) -> Self {
        Self::with_limit(policy, Self::DEFAULT_WARNING_LIMIT)
    }

    pub fn with_limit(policy: RecoveryPolicy, warning_limit: usize) -> Self {
        StandardErrorListener {
            state: Mutex::new(ListenerState { policy, warnings: 0 }),
            warning_limit,
        }
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.lock().policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ErrorListener for StandardErrorListener {
    fn warning(&self, error: XsltError) -> Result<(), XsltError> {
        let mut state = self.lock();
        match state.policy {
            RecoveryPolicy::RecoverSilently => Ok(()),
            RecoveryPolicy::RecoverWithWarnings => {
                log::warn!("Recoverable error\n{}", expanded_message(&error));
                state.warnings += 1;
                if state.warnings > self.warning_limit {
                    log::warn!("No more warnings will be displayed");
                    state.policy = RecoveryPolicy::RecoverSilently;
                    state.warnings = 0;
                }
                Ok(())
            }
            RecoveryPolicy::DoNotRecover => {
                log::error!("Recoverable error\n{}", expanded_message(&error));
                Err(XsltError::Dynamic {
                    message: "Processing terminated because error recovery is disabled".into(),
                    source: Some(Box::new(error)),
                })
            }
        }
    }
}

/// The recovery policy in force and the listener recoverable errors go to.
#[derive(Clone)]
pub struct Diagnostics {
    policy: RecoveryPolicy,
    listener: Arc<dyn ErrorListener>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics").field("policy", &self.policy).finish()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::standard(RecoveryPolicy::default(), StandardErrorListener::DEFAULT_WARNING_LIMIT)
    }
}

impl Diagnostics {
    pub fn new(policy: RecoveryPolicy, listener: Arc<dyn ErrorListener>) -> Self {
        Diagnostics { policy, listener }
    }

    pub fn standard(policy: RecoveryPolicy, warning_limit: usize) -> Self {
        Self::new(policy, Arc::new(StandardErrorListener::with_limit(policy, warning_limit)))
    }

    pub fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    pub fn is_silent(&self) -> bool {
        self.policy == RecoveryPolicy::RecoverSilently
    }

    pub fn listener(&self) -> &Arc<dyn ErrorListener> {
        &self.listener
    }

    pub fn report_recoverable(&self, error: XsltError) -> Result<(), XsltError> {
        self.listener.warning(error)
    }
}
