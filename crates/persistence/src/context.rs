//! Actor context for engine operations.
//!
//! Every write records who created or obsoleted a version. [`ActorContext`]
//! carries that identity, plus an optional correlation ID for tracing, through
//! every call. There is no ambient identity: callers pass a context explicitly
//! or use [`ActorContext::system`].

use uuid::Uuid;

use crate::error::ValidationError;
use crate::model::SecurityUserKeys;

/// The security principal on whose behalf an operation runs.
///
/// ```
/// use helios_entity_persistence::context::ActorContext;
/// use uuid::Uuid;
///
/// let actor = ActorContext::new(Uuid::new_v4(), "jdoe").with_correlation_id("req-42");
/// assert_eq!(actor.user_name(), "jdoe");
/// assert!(!actor.is_system());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_key: Uuid,
    user_name: String,
    correlation_id: Option<String>,
}

impl ActorContext {
    /// Creates a context for the given security user.
    pub fn new(user_key: Uuid, user_name: impl Into<String>) -> Self {
        Self {
            user_key,
            user_name: user_name.into(),
            correlation_id: None,
        }
    }

    /// The engine's own identity.
    pub fn system() -> Self {
        Self::new(SecurityUserKeys::SYSTEM, "SYSTEM")
    }

    /// Sets the correlation ID used in log records.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Key of the acting security user.
    pub fn user_key(&self) -> Uuid {
        self.user_key
    }

    /// Login name of the acting security user.
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns `true` for the system identity.
    pub fn is_system(&self) -> bool {
        self.user_key == SecurityUserKeys::SYSTEM
    }
}

impl Default for ActorContext {
    fn default() -> Self {
        Self::system()
    }
}

/// Builder for actor contexts supplied by an external caller (e.g. token claims).
#[derive(Debug, Default)]
pub struct ActorContextBuilder {
    user_key: Option<Uuid>,
    user_name: Option<String>,
    correlation_id: Option<String>,
}

impl ActorContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user key.
    pub fn user_key(mut self, user_key: Uuid) -> Self {
        self.user_key = Some(user_key);
        self
    }

    /// Sets the user name.
    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Builds the context, returning an error if the user key is missing.
    pub fn build(self) -> Result<ActorContext, ValidationError> {
        let user_key = self
            .user_key
            .ok_or_else(|| ValidationError::MissingRequiredField {
                field: "user_key".to_string(),
            })?;
        let user_name = self.user_name.unwrap_or_else(|| user_key.to_string());

        let mut ctx = ActorContext::new(user_key, user_name);
        ctx.correlation_id = self.correlation_id;
        Ok(ctx)
    }
}
