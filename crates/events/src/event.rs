/// A domain-agnostic event payload.
///
/// Payloads are:
/// - **immutable** (treat them as facts about a committed change)
/// - **typed**: every known kind of change is its own variant, never an open JSON blob
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "document.transitioned").
    ///
    /// This is the key handlers subscribe to.
    fn event_type(&self) -> &'static str;
}
