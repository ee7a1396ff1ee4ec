//! Classified errors shared by the storage and service layers.
//!
//! A [`ClassifiedError`] carries the name of the operation that failed, an
//! enumerated kind callers branch on, and optionally the underlying cause.

use service_core::error::AppError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error tagged with an operation name and a kind.
#[derive(Debug, Error)]
#[error("op: {op}, kind: {kind}{}", cause_suffix(.cause))]
pub struct ClassifiedError<K> {
    op: &'static str,
    kind: K,
    #[source]
    cause: Option<BoxError>,
}

fn cause_suffix(cause: &Option<BoxError>) -> String {
    cause
        .as_ref()
        .map(|cause| format!(", error: {}", cause))
        .unwrap_or_default()
}

impl<K: Copy + PartialEq> ClassifiedError<K> {
    pub fn new(op: &'static str, kind: K) -> Self {
        Self {
            op,
            kind,
            cause: None,
        }
    }

    pub fn wrap(op: &'static str, kind: K, cause: impl Into<BoxError>) -> Self {
        Self {
            op,
            kind,
            cause: Some(cause.into()),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn is(&self, kind: K) -> bool {
        self.kind == kind
    }
}

impl<K: fmt::Debug + fmt::Display> ClassifiedError<K> {
    /// First error of type `T` in the cause chain, if any.
    pub fn find_cause<T: StdError + 'static>(&self) -> Option<&T> {
        let mut current = self.source();
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<T>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

/// Storage failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RepoKind {
    #[error("unknown")]
    Unknown,
    #[error("not_found")]
    NotFound,
    #[error("duplicate")]
    Duplicate,
    #[error("invalid_argument")]
    InvalidArgument,
    #[error("cancelled")]
    Cancelled,
}

/// Service failure kinds, as seen by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceKind {
    #[error("unknown")]
    Unknown,
    #[error("business_logic")]
    BusinessLogic,
    #[error("not_found")]
    NotFound,
    #[error("cancelled")]
    Cancelled,
}

pub type RepoError = ClassifiedError<RepoKind>;
pub type ServiceError = ClassifiedError<ServiceKind>;

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        let err = anyhow::Error::new(err);
        match kind {
            ServiceKind::NotFound => AppError::NotFound(err),
            ServiceKind::BusinessLogic => AppError::BusinessRule(err),
            ServiceKind::Cancelled => AppError::Timeout(err),
            ServiceKind::Unknown => AppError::InternalError(err),
        }
    }
}
