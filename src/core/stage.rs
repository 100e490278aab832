//! Stage adapter: an ordered chain of backend attempts.
//!
//! One attempt per backend, primary first, each bounded by its own timeout.
//! The chain is data (a Vec of slots) so the "one primary, one fallback"
//! policy is visible in construction rather than nested control flow.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::adapters::{Backend, BackendError};
use crate::domain::{BackendRole, Stage};

/// One backend failure inside a stage
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub backend: String,
    pub role: BackendRole,
    pub error: BackendError,
}

impl fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.backend, self.role, self.error)
    }
}

/// Every backend configured for a stage failed
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed after trying {}", tried(.attempts))]
pub struct StageFailure {
    pub stage: Stage,
    /// Attempts in the order they were made
    pub attempts: Vec<AttemptReport>,
}

fn tried(attempts: &[AttemptReport]) -> String {
    if attempts.is_empty() {
        return "no backends".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StageFailure {
    /// Names of the backends that were tried
    pub fn backends(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.backend.as_str()).collect()
    }
}

/// Successful stage output with provenance
#[derive(Debug)]
pub struct Produced<O> {
    pub output: O,
    pub role: BackendRole,
    pub backend: String,
    pub elapsed: Duration,
    /// Failed attempts before the one that succeeded
    pub failures: Vec<AttemptReport>,
}

struct Slot<I, O> {
    backend: Arc<dyn Backend<I, O>>,
    role: BackendRole,
    timeout: Duration,
}

/// Primary backend with an optional fallback, for one stage
pub struct StageAdapter<I, O> {
    stage: Stage,
    slots: Vec<Slot<I, O>>,
}

impl<I, O> StageAdapter<I, O>
where
    I: Sync,
    O: Send,
{
    pub fn new(stage: Stage, primary: Arc<dyn Backend<I, O>>, timeout: Duration) -> Self {
        Self {
            stage,
            slots: vec![Slot {
                backend: primary,
                role: BackendRole::Primary,
                timeout,
            }],
        }
    }

    /// Add the fallback backend. A second call replaces the first fallback.
    pub fn with_fallback(mut self, fallback: Arc<dyn Backend<I, O>>, timeout: Duration) -> Self {
        self.slots.truncate(1);
        self.slots.push(Slot {
            backend: fallback,
            role: BackendRole::Fallback,
            timeout,
        });
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Backend names in attempt order
    pub fn backend_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.backend.name().to_string())
            .collect()
    }

    /// Try each backend once, in order, until one succeeds
    pub async fn produce(&self, input: &I) -> Result<Produced<O>, StageFailure> {
        let mut failures = Vec::new();

        for slot in &self.slots {
            let name = slot.backend.name().to_string();
            let start = Instant::now();
            debug!(stage = %self.stage, backend = %name, role = ?slot.role, "Attempting backend");

            let result = match tokio::time::timeout(slot.timeout, slot.backend.produce(input)).await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(slot.timeout)),
            };

            match result {
                Ok(output) => {
                    return Ok(Produced {
                        output,
                        role: slot.role,
                        backend: name,
                        elapsed: start.elapsed(),
                        failures,
                    });
                }
                Err(error) => {
                    warn!(
                        stage = %self.stage,
                        backend = %name,
                        role = ?slot.role,
                        error = %error,
                        "Backend failed"
                    );
                    failures.push(AttemptReport {
                        backend: name,
                        role: slot.role,
                        error,
                    });
                }
            }
        }

        Err(StageFailure {
            stage: self.stage,
            attempts: failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixed {
        name: &'static str,
        result: Result<u32, BackendError>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl Fixed {
        fn ok(name: &'static str, value: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(value),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn err(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err(BackendError::RateLimited("429".to_string())),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(0),
                delay: Duration::from_secs(60),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend<(), u32> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn produce(&self, _input: &()) -> Result<u32, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }
    }

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = Fixed::ok("primary", 1);
        let fallback = Fixed::ok("fallback", 2);
        let adapter = StageAdapter::<(), u32>::new(Stage::Content, primary.clone(), T)
            .with_fallback(fallback.clone(), T);

        let produced = adapter.produce(&()).await.unwrap();
        assert_eq!(produced.output, 1);
        assert_eq!(produced.role, BackendRole::Primary);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let primary = Fixed::err("primary");
        let fallback = Fixed::ok("fallback", 2);
        let adapter = StageAdapter::<(), u32>::new(Stage::Narration, primary.clone(), T)
            .with_fallback(fallback.clone(), T);

        let produced = adapter.produce(&()).await.unwrap();
        assert_eq!(produced.output, 2);
        assert_eq!(produced.role, BackendRole::Fallback);
        assert_eq!(produced.backend, "fallback");
        assert_eq!(produced.failures.len(), 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_backend_tried_exactly_once() {
        let primary = Fixed::err("primary");
        let fallback = Fixed::err("fallback");
        let adapter = StageAdapter::<(), u32>::new(Stage::Render, primary.clone(), T)
            .with_fallback(fallback.clone(), T);

        let failure = adapter.produce(&()).await.unwrap_err();
        assert_eq!(failure.stage, Stage::Render);
        assert_eq!(failure.backends(), vec!["primary", "fallback"]);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let primary = Fixed::slow("slow");
        let fallback = Fixed::ok("fallback", 7);
        let adapter =
            StageAdapter::<(), u32>::new(Stage::Content, primary, Duration::from_millis(50))
                .with_fallback(fallback, T);

        let produced = adapter.produce(&()).await.unwrap();
        assert_eq!(produced.output, 7);
        assert!(matches!(
            produced.failures[0].error,
            BackendError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_second_fallback_replaces_first() {
        let adapter = StageAdapter::<(), u32>::new(Stage::Content, Fixed::err("p"), T)
            .with_fallback(Fixed::err("f1"), T)
            .with_fallback(Fixed::ok("f2", 3), T);

        assert_eq!(adapter.backend_names(), vec!["p", "f2"]);
        assert_eq!(adapter.produce(&()).await.unwrap().output, 3);
    }

    #[test]
    fn test_failure_message_names_backends() {
        let failure = StageFailure {
            stage: Stage::Narration,
            attempts: vec![AttemptReport {
                backend: "elevenlabs".to_string(),
                role: BackendRole::Primary,
                error: BackendError::Unavailable("no key".to_string()),
            }],
        };
        let msg = failure.to_string();
        assert!(msg.starts_with("narration stage failed"));
        assert!(msg.contains("elevenlabs"));
    }
}
