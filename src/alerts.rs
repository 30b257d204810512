//! Decision & alert controller.
//!
//! Turns a final probability into real-world effects:
//!
//! - **Relay**: every request at or above the threshold publishes the node's
//!   risk command several times (the transport gives no delivery ack).
//!   Below the threshold, the clear command is published as many times as the
//!   pipeline mode asks for, possibly zero.
//! - **Alert**: a per-node `quiet -> alerted` state machine. The first request
//!   at or above the threshold sends one notification and, if the send
//!   succeeds, marks the node alerted. The first request below the threshold
//!   returns the node to quiet. No hysteresis, no cooldown.
//!
//! Failures on either path are logged and swallowed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::notify::Notifier;
use crate::pipeline::PipelineMode;
use crate::relay::RelayPublisher;

// ---

/// Per-node "alert already sent for this escalation" memory.
pub trait AlertStateStore: Send + Sync {
    fn get(&self, node_id: &str) -> bool;
    fn set(&self, node_id: &str, alerted: bool);
}

/// Process-lifetime alert state. A restart forgets it, which may re-alert once.
#[derive(Debug, Default)]
pub struct InMemoryAlertState {
    alerted: Mutex<HashMap<String, bool>>,
}

impl AlertStateStore for InMemoryAlertState {
    fn get(&self, node_id: &str) -> bool {
        // ---
        let map = self.alerted.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(node_id).copied().unwrap_or(false)
    }

    fn set(&self, node_id: &str, alerted: bool) {
        // ---
        let mut map = self.alerted.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(node_id.to_string(), alerted);
    }
}

/// Repetition of the risk command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayPolicy {
    pub repeats: u32,
    pub delay: Duration,

    /// Upper bound on a single publish. A stalled transport counts as a
    /// failed attempt once this elapses.
    pub publish_timeout: Duration,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            repeats: 5,
            delay: Duration::from_millis(200),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

/// What the alert state machine did for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// Below threshold and already quiet.
    StayedQuiet,
    /// Below threshold, previously alerted; back to quiet.
    Reset,
    /// Above threshold, notification sent; now alerted.
    Alerted,
    /// Above threshold but this escalation was already notified.
    AlreadyAlerted,
    /// Above threshold, send failed; stays quiet so the next request retries.
    SendFailed,
    /// Above threshold but no notifier is configured.
    NotConfigured,
}

pub struct DecisionController {
    threshold: f64,
    policy: RelayPolicy,
    relay: Option<Arc<dyn RelayPublisher>>,
    notifier: Option<Arc<dyn Notifier>>,
    alerts: Arc<dyn AlertStateStore>,
}

impl DecisionController {
    // ---
    pub fn new(
        threshold: f64,
        policy: RelayPolicy,
        relay: Option<Arc<dyn RelayPublisher>>,
        notifier: Option<Arc<dyn Notifier>>,
        alerts: Arc<dyn AlertStateStore>,
    ) -> Self {
        Self {
            threshold,
            policy,
            relay,
            notifier,
            alerts,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Binary risk flag for a final probability.
    pub fn is_risk(&self, probability: f64) -> bool {
        probability >= self.threshold
    }

    /// Relay commands and alert update for one prediction. The two paths run
    /// concurrently; neither waits on the other.
    pub async fn dispatch(
        &self,
        mode: PipelineMode,
        node_id: &str,
        probability: f64,
        alert_text: &str,
    ) -> AlertTransition {
        // ---
        let (_, transition) = tokio::join!(
            self.publish_relay(mode, node_id, probability),
            self.update_alert(node_id, probability, alert_text)
        );
        transition
    }

    /// Publish the relay command for `probability`. Returns how many publishes
    /// succeeded.
    pub async fn publish_relay(&self, mode: PipelineMode, node_id: &str, probability: f64) -> u32 {
        // ---
        let Some(relay) = &self.relay else {
            tracing::debug!("Relay transport not configured; skipping relay command");
            return 0;
        };

        let risk = self.is_risk(probability);
        let (payload, attempts) = if risk {
            (format!("{node_id}=1"), self.policy.repeats)
        } else {
            (format!("{node_id}=0"), mode.clear_publishes())
        };
        if attempts == 0 {
            tracing::info!("Probability below threshold for node {}; no relay message sent", node_id);
            return 0;
        }

        let mut sent = 0;
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.publish_timeout, relay.publish(&payload)).await {
                Ok(Ok(())) => {
                    sent += 1;
                    tracing::info!("Relay sent {}/{} -> {}", attempt, attempts, payload);
                }
                Ok(Err(e)) => tracing::warn!("Relay publish {}/{} failed: {:#}", attempt, attempts, e),
                Err(_) => tracing::warn!(
                    "Relay publish {}/{} timed out after {:?}",
                    attempt,
                    attempts,
                    self.policy.publish_timeout
                ),
            }
            if attempt < attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        sent
    }

    /// Advance the node's alert state machine.
    pub async fn update_alert(
        &self,
        node_id: &str,
        probability: f64,
        alert_text: &str,
    ) -> AlertTransition {
        // ---
        let alerted = self.alerts.get(node_id);

        if !self.is_risk(probability) {
            if alerted {
                tracing::info!("Node {} back below threshold; alert state reset", node_id);
                self.alerts.set(node_id, false);
                return AlertTransition::Reset;
            }
            return AlertTransition::StayedQuiet;
        }

        if alerted {
            tracing::debug!("Node {} already alerted for this escalation", node_id);
            return AlertTransition::AlreadyAlerted;
        }

        let Some(notifier) = &self.notifier else {
            tracing::warn!("Node {} is at risk but no notifier is configured", node_id);
            return AlertTransition::NotConfigured;
        };

        match notifier.send(alert_text).await {
            Ok(()) => {
                tracing::info!("Alert sent for node {}", node_id);
                self.alerts.set(node_id, true);
                AlertTransition::Alerted
            }
            Err(e) => {
                tracing::warn!("Alert for node {} failed: {:#}", node_id, e);
                AlertTransition::SendFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeRelay {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RelayPublisher for FakeRelay {
        async fn publish(&self, payload: &str) -> Result<()> {
            self.published.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    struct FailingRelay;

    #[async_trait]
    impl RelayPublisher for FailingRelay {
        async fn publish(&self, _payload: &str) -> Result<()> {
            Err(anyhow!("broker gone"))
        }
    }

    /// Transport whose publish never completes, like a full client queue
    /// with the broker unreachable.
    struct StalledRelay;

    #[async_trait]
    impl RelayPublisher for StalledRelay {
        async fn publish(&self, _payload: &str) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("gateway rejected message"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn policy() -> RelayPolicy {
        RelayPolicy {
            repeats: 5,
            delay: Duration::ZERO,
            publish_timeout: Duration::from_millis(50),
        }
    }

    fn controller(
        relay: Arc<dyn RelayPublisher>,
        notifier: Arc<FakeNotifier>,
        alerts: Arc<InMemoryAlertState>,
    ) -> DecisionController {
        DecisionController::new(0.5, policy(), Some(relay), Some(notifier), alerts)
    }

    #[test]
    fn test_risk_flag_threshold_is_inclusive() {
        // ---
        let c = DecisionController::new(0.5, policy(), None, None, Arc::new(InMemoryAlertState::default()));
        assert!(c.is_risk(0.5));
        assert!(c.is_risk(0.93));
        assert!(!c.is_risk(0.4999));
    }

    #[tokio::test]
    async fn test_alert_sequence_sends_once_per_escalation() {
        // ---
        let notifier = Arc::new(FakeNotifier::default());
        let alerts = Arc::new(InMemoryAlertState::default());
        let c = controller(Arc::new(FakeRelay::default()), notifier.clone(), alerts.clone());

        let mut transitions = Vec::new();
        for p in [0.3, 0.6, 0.6, 0.4] {
            transitions.push(c.update_alert("2", p, "Cloudburst Risk").await);
        }

        assert_eq!(
            transitions,
            vec![
                AlertTransition::StayedQuiet,
                AlertTransition::Alerted,
                AlertTransition::AlreadyAlerted,
                AlertTransition::Reset,
            ]
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert!(!alerts.get("2"));
    }

    #[tokio::test]
    async fn test_failed_send_stays_quiet_and_retries() {
        // ---
        let notifier = Arc::new(FakeNotifier::default());
        notifier.fail.store(true, Ordering::SeqCst);
        let alerts = Arc::new(InMemoryAlertState::default());
        let c = controller(Arc::new(FakeRelay::default()), notifier.clone(), alerts.clone());

        assert_eq!(c.update_alert("1", 0.8, "x").await, AlertTransition::SendFailed);
        assert!(!alerts.get("1"));

        notifier.fail.store(false, Ordering::SeqCst);
        assert_eq!(c.update_alert("1", 0.8, "x").await, AlertTransition::Alerted);
        assert!(alerts.get("1"));
    }

    #[tokio::test]
    async fn test_alert_state_is_per_node() {
        // ---
        let notifier = Arc::new(FakeNotifier::default());
        let alerts = Arc::new(InMemoryAlertState::default());
        let c = controller(Arc::new(FakeRelay::default()), notifier.clone(), alerts.clone());

        assert_eq!(c.update_alert("1", 0.7, "n1").await, AlertTransition::Alerted);
        assert_eq!(c.update_alert("2", 0.7, "n2").await, AlertTransition::Alerted);
        assert_eq!(c.update_alert("1", 0.7, "n1").await, AlertTransition::AlreadyAlerted);
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_missing_notifier_leaves_state_quiet() {
        // ---
        let alerts = Arc::new(InMemoryAlertState::default());
        let c = DecisionController::new(0.5, policy(), None, None, alerts.clone());
        assert_eq!(c.update_alert("1", 0.9, "x").await, AlertTransition::NotConfigured);
        assert!(!alerts.get("1"));
    }

    #[tokio::test]
    async fn test_risk_publishes_repeated_command() {
        // ---
        let relay = Arc::new(FakeRelay::default());
        let c = controller(relay.clone(), Arc::new(FakeNotifier::default()), Arc::default());

        let sent = c.publish_relay(PipelineMode::LiveMerge, "2", 0.72).await;
        assert_eq!(sent, 5);
        assert_eq!(*relay.published.lock().unwrap(), vec!["2=1"; 5]);
    }

    #[tokio::test]
    async fn test_clear_command_depends_on_mode() {
        // ---
        let relay = Arc::new(FakeRelay::default());
        let c = controller(relay.clone(), Arc::new(FakeNotifier::default()), Arc::default());

        assert_eq!(c.publish_relay(PipelineMode::LiveMerge, "1", 0.2).await, 0);
        assert!(relay.published.lock().unwrap().is_empty());

        assert_eq!(c.publish_relay(PipelineMode::HistoryOnly, "1", 0.2).await, 1);
        assert_eq!(*relay.published.lock().unwrap(), vec!["1=0"]);
    }

    #[tokio::test]
    async fn test_relay_failures_are_swallowed() {
        // ---
        let c = controller(Arc::new(FailingRelay), Arc::new(FakeNotifier::default()), Arc::default());
        assert_eq!(c.publish_relay(PipelineMode::LiveMerge, "1", 0.9).await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_runs_both_paths() {
        // ---
        let relay = Arc::new(FakeRelay::default());
        let notifier = Arc::new(FakeNotifier::default());
        let c = controller(relay.clone(), notifier.clone(), Arc::default());

        let transition = c.dispatch(PipelineMode::HistoryOnly, "1", 0.55, "alert").await;
        assert_eq!(transition, AlertTransition::Alerted);
        assert_eq!(relay.published.lock().unwrap().len(), 5);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_relay_does_not_block_alerts() {
        // ---
        let notifier = Arc::new(FakeNotifier::default());
        let c = controller(Arc::new(StalledRelay), notifier.clone(), Arc::default());

        for _ in 0..8 {
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                c.dispatch(PipelineMode::LiveMerge, "1", 0.9, "n1"),
            )
            .await;
            assert!(outcome.is_ok(), "dispatch hung behind the relay");
        }

        let transition = tokio::time::timeout(
            Duration::from_secs(5),
            c.dispatch(PipelineMode::LiveMerge, "2", 0.9, "n2"),
        )
        .await
        .unwrap();
        assert_eq!(transition, AlertTransition::Alerted);
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_stalled_publish_counts_as_failure() {
        // ---
        let c = controller(Arc::new(StalledRelay), Arc::new(FakeNotifier::default()), Arc::default());
        assert_eq!(c.publish_relay(PipelineMode::HistoryOnly, "1", 0.9).await, 0);
    }
}
