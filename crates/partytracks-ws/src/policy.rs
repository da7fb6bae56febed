//! Socket-binding decision table.
//!
//! The original component was a React effect that decided, on every render,
//! whether a socket should be created, torn down, or left alone given an
//! `enabled` flag and an options identity. With no render-effect runtime to
//! hook into, that decision collapses to a small synchronous state machine:
//! callers feed it `EffectInput`s (any time `enabled` or the options key
//! changes) and act on the `EffectAction` it returns. The discrimination
//! table itself -- the part worth keeping from the original component -- is
//! unchanged.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectInput {
    pub enabled: bool,
    /// Identity of the socket's connection options (URL, protocols, ...). A
    /// change here means "tear down and rebuild with the new options", not
    /// "reconnect the existing socket".
    pub options_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectAction {
    /// No existing socket and nothing to do.
    None,
    /// Create a new socket and bind to it.
    Create,
    /// Tear down the current socket without creating a new one.
    Teardown,
    /// Tear down the current socket and immediately create a new one (the
    /// options identity changed while still enabled).
    Rebind,
    /// Current socket is already correct for this input.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SocketBindingPolicy {
    bound: Option<EffectInput>,
}

impl Default for SocketBindingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketBindingPolicy {
    pub fn new() -> Self {
        Self { bound: None }
    }

    /// Feed a new input and get back what to do. Call this once per actual
    /// change to `enabled` or `options_key`; feeding the same input twice
    /// returns `Unchanged` both times.
    pub fn on_effect(&mut self, input: EffectInput) -> EffectAction {
        let action = match (&self.bound, input.enabled) {
            (None, false) => EffectAction::None,
            (None, true) => EffectAction::Create,
            (Some(_), false) => EffectAction::Teardown,
            (Some(bound), true) if bound.options_key != input.options_key => EffectAction::Rebind,
            (Some(_), true) => EffectAction::Unchanged,
        };

        self.bound = if input.enabled { Some(input) } else { None };
        action
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}
