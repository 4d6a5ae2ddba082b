//! Recording permission boundary
//!
//! Permission is owned by the platform; the engine only checks the answer
//! before opening a capture session. The binding layer supplies the real
//! implementation; [`AlwaysGranted`] is the default for hosts without a
//! permission model.

/// Outcome of a permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

/// Platform permission collaborator
pub trait PermissionService: Send + Sync {
    /// Current recording permission
    fn status(&self) -> PermissionStatus;

    /// Run the platform request flow and report the result
    ///
    /// The default implementation performs no flow and returns the
    /// current status.
    fn request(&self) -> PermissionStatus {
        self.status()
    }
}

/// Permission service for hosts without a permission model
pub struct AlwaysGranted;

impl PermissionService for AlwaysGranted {
    fn status(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }
}
