/// Camera access gate.
///
/// The session may only be configured once access is granted.  The gate
/// starts from the configured policy; while undetermined, authorization
/// requests queue until someone answers the prompt via
/// [`PromptAccessGate::resolve`].
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::AccessPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authorization {
    Granted,
    Denied,
    Undetermined,
}

impl From<AccessPolicy> for Authorization {
    fn from(policy: AccessPolicy) -> Self {
        match policy {
            AccessPolicy::Granted => Authorization::Granted,
            AccessPolicy::Denied => Authorization::Denied,
            AccessPolicy::Undetermined => Authorization::Undetermined,
        }
    }
}

/// Invoked once with `true` when access is granted, `false` when denied.
pub type AuthorizationCallback = Box<dyn FnOnce(bool) + Send>;

pub trait AccessGate: Send + Sync {
    fn current_authorization(&self) -> Authorization;

    /// Asks for access.  `callback` fires exactly once, possibly immediately.
    fn request_authorization(&self, callback: AuthorizationCallback);
}

struct GateState {
    authorization: Authorization,
    waiting: Vec<AuthorizationCallback>,
}

pub struct PromptAccessGate {
    state: Mutex<GateState>,
}

impl PromptAccessGate {
    pub fn new(initial: Authorization) -> Self {
        Self {
            state: Mutex::new(GateState { authorization: initial, waiting: Vec::new() }),
        }
    }

    /// Records the user's answer and fires every queued callback.
    pub fn resolve(&self, granted: bool) {
        let waiting = {
            let mut state = self.state.lock();
            state.authorization = if granted {
                Authorization::Granted
            } else {
                Authorization::Denied
            };
            std::mem::take(&mut state.waiting)
        };
        for callback in waiting {
            callback(granted);
        }
    }
}

impl AccessGate for PromptAccessGate {
    fn current_authorization(&self) -> Authorization {
        self.state.lock().authorization
    }

    fn request_authorization(&self, callback: AuthorizationCallback) {
        let granted = {
            let mut state = self.state.lock();
            match state.authorization {
                Authorization::Granted => true,
                Authorization::Denied => false,
                Authorization::Undetermined => {
                    state.waiting.push(callback);
                    return;
                }
            }
        };
        callback(granted);
    }
}
