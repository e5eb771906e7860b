//! Limits and collector tuning for a [`State`](crate::State).

/// Construction-time settings. `Default` gives the stock limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateConfig {
    /// Value-stack slots one thread may use before a stack overflow.
    pub max_stack_slots: usize,
    /// Nested call frames one thread may hold.
    pub max_call_depth: usize,
    /// Native re-entries (host calls, metamethods, resumes) before
    /// "C stack overflow".
    pub max_c_calls: usize,
    /// Next collection starts when the heap reaches this percentage of the
    /// size that survived the last one.
    pub gc_pause: usize,
    pub gc_stepmul: usize,
    /// Install `print`, `pcall`, `coroutine` and friends on open.
    pub open_base_library: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            max_stack_slots: 1_000_000,
            max_call_depth: 20_000,
            max_c_calls: 200,
            gc_pause: 200,
            gc_stepmul: 200,
            open_base_library: true,
        }
    }
}

impl StateConfig {
    /// Stock limits without the base library.
    pub fn bare() -> Self {
        StateConfig {
            open_base_library: false,
            ..Self::default()
        }
    }
}
