use std::collections::VecDeque;

use calllog_types::PermissionState;
use serde::{Deserialize, Serialize};

/// Correlation code for the one permission prompt a plugin instance can have in flight.
pub const PROMPT_REQUEST_CODE: i32 = 0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    AwaitPrompt,
    Denied,
}

/// Per-permission answer reported by the OS when a prompt closes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// The caller's flag only saves a prompt; it never stands in for the OS grant.
pub fn authorize(state: PermissionState) -> GateDecision {
    if state.declared_by_caller || state.granted_by_os {
        if !state.granted_by_os {
            return GateDecision::Denied;
        }
        return GateDecision::Proceed;
    }
    GateDecision::AwaitPrompt
}

/// Any denial (or an empty answer from a dismissed dialog) denies the whole prompt.
pub fn resolve(grants: &[PermissionStatus]) -> GateDecision {
    if grants.is_empty() || grants.iter().any(|g| *g == PermissionStatus::Denied) {
        GateDecision::Denied
    } else {
        GateDecision::Proceed
    }
}

/// What the gate did with a request handed to [`PermissionGate::admit`].
#[derive(Debug)]
pub enum Admission<T> {
    Proceed(T),
    Denied(T),
    /// Parked in the slot; the caller must now ask the host to show the prompt.
    PromptRequired,
    /// Parked behind the outstanding prompt.
    Queued,
}

/// Outcome of a prompt closing.
#[derive(Debug)]
pub struct Resolution<T> {
    pub decision: GateDecision,
    pub request: T,
    /// Requests that queued behind the prompt; they must be admitted again.
    pub waiting: Vec<T>,
}

/// Holds requests across the permission-prompt boundary.
///
/// One correlation slot, so at most one prompt is outstanding. Requests that
/// need a prompt while the slot is taken wait in arrival order.
#[derive(Debug)]
pub struct PermissionGate<T> {
    outstanding: Option<T>,
    waiting: VecDeque<T>,
}

impl<T> Default for PermissionGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PermissionGate<T> {
    pub fn new() -> Self {
        Self {
            outstanding: None,
            waiting: VecDeque::new(),
        }
    }

    pub fn prompt_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn admit(&mut self, state: PermissionState, request: T) -> Admission<T> {
        match authorize(state) {
            GateDecision::Proceed => Admission::Proceed(request),
            GateDecision::Denied => {
                tracing::debug!("permission denied: caller declared access the OS has not granted");
                Admission::Denied(request)
            }
            GateDecision::AwaitPrompt => {
                if self.outstanding.is_none() {
                    self.outstanding = Some(request);
                    Admission::PromptRequired
                } else {
                    self.waiting.push_back(request);
                    Admission::Queued
                }
            }
        }
    }

    /// Close the outstanding prompt. Returns `None` when the code does not
    /// match the slot or no prompt is pending.
    pub fn resolve(
        &mut self,
        request_code: i32,
        grants: &[PermissionStatus],
    ) -> Option<Resolution<T>> {
        if request_code != PROMPT_REQUEST_CODE {
            tracing::warn!(request_code, "ignoring permission result for unknown request code");
            return None;
        }
        let Some(request) = self.outstanding.take() else {
            tracing::warn!("ignoring permission result with no prompt outstanding");
            return None;
        };
        let decision = resolve(grants);
        tracing::debug!(?decision, "permission prompt resolved");
        Some(Resolution {
            decision,
            request,
            waiting: self.waiting.drain(..).collect(),
        })
    }
}
