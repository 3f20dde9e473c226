//! Notification collaborator for new and escalated alerts.

use crate::alerts::SafetyAlert;
use async_trait::async_trait;
use safeguard_domain::enums::AlertSeverity;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delivers alerts to humans or downstream systems.
///
/// Delivery is best-effort. A failure is logged by the caller and does not
/// affect the alert itself.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &SafetyAlert) -> anyhow::Result<()>;
}

/// Logs alerts at a level matching their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, alert: &SafetyAlert) -> anyhow::Result<()> {
        let value = alert.evidence.as_ref().map(|r| r.value);
        match alert.severity {
            AlertSeverity::Info => info!(
                alert = %alert.id,
                condition = %alert.key.condition,
                value = ?value,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => warn!(
                alert = %alert.id,
                condition = %alert.key.condition,
                value = ?value,
                "{}",
                alert.message
            ),
            AlertSeverity::Critical => error!(
                alert = %alert.id,
                condition = %alert.key.condition,
                value = ?value,
                "CRITICAL: {}",
                alert.message
            ),
            AlertSeverity::Emergency => error!(
                alert = %alert.id,
                condition = %alert.key.condition,
                value = ?value,
                "EMERGENCY: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Fans an alert out to several notifiers.
///
/// Every notifier is attempted; the call fails only if all of them fail.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn deliver(&self, alert: &SafetyAlert) -> anyhow::Result<()> {
        let mut failures = 0;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.deliver(alert).await {
                failures += 1;
                warn!(alert = %alert.id, error = %e, "Notifier failed");
            }
        }
        if failures > 0 && failures == self.notifiers.len() {
            anyhow::bail!("all {failures} notifiers failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKey;
    use crate::testing::RecordingNotifier;
    use safeguard_domain::enums::{BreachCondition, RiskDimension};

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn deliver(&self, _alert: &SafetyAlert) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }
    }

    fn alert() -> SafetyAlert {
        SafetyAlert::new(
            AlertKey::new(RiskDimension::Portfolio, BreachCondition::Drawdown, None),
            AlertSeverity::Critical,
            "drawdown 12%".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_multi_notifier_tolerates_partial_failure() {
        let recorder = Arc::new(RecordingNotifier::default());
        let multi = MultiNotifier::new()
            .with(Arc::new(Broken))
            .with(Arc::new(LogNotifier))
            .with(recorder.clone());

        multi.deliver(&alert()).await.unwrap();
        assert_eq!(recorder.delivered().await.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_notifier_fails_when_all_fail() {
        let multi = MultiNotifier::new().with(Arc::new(Broken));
        assert!(multi.deliver(&alert()).await.is_err());
        assert!(MultiNotifier::new().deliver(&alert()).await.is_ok());
    }
}
