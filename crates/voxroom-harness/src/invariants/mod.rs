//! Invariant checking for simulated sessions.
//!
//! Invariants are properties that must hold after every simulated step, no
//! matter how the step was reached. Tests extract a [`SystemSnapshot`] from
//! the live sessions and run every registered [`Invariant`] against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&SystemSnapshot::of(&session), "after agent joined");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    AgentDisconnectedWithRoom, FailedIffReasons, ProjectionConsistency, SessionConnectedVariant,
};
pub use snapshot::{SessionObservation, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard invariant.
    ///
    /// Includes:
    /// - [`FailedIffReasons`]: failed exactly when reasons are outstanding
    /// - [`ProjectionConsistency`]: flags and phase agree with the state
    /// - [`SessionConnectedVariant`]: session variant agrees with connection
    /// - [`AgentDisconnectedWithRoom`]: agent disconnected only with the room
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(FailedIffReasons);
        registry.add(ProjectionConsistency);
        registry.add(SessionConnectedVariant);
        registry.add(AgentDisconnectedWithRoom);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(|v| v.to_string()).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
