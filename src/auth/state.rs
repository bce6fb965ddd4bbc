//! Authentication state trait and macro.

use super::gate::AuthGate;

/// Trait for state types that can authorize requests.
pub trait HasAuthGate {
    fn auth_gate(&self) -> &AuthGate;
}

/// Macro to implement `HasAuthGate` for state structs with a `gate: AuthGate` field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct SessionState {
///     pub gate: AuthGate,
///     // ... other fields
/// }
///
/// impl_has_auth_gate!(SessionState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_gate {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthGate for $state_type {
            fn auth_gate(&self) -> &$crate::auth::AuthGate {
                &self.gate
            }
        }
    };
}
