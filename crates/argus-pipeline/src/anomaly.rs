//! Behavioral anomaly detection.
//!
//! One baseline per actor (user id, else source IP), built from a bounded
//! rolling history. Anomaly factors contribute by average, never by sum.

use crate::collector::{EventListener, ListenerError};
use argus_core::{EventOutcome, SecurityEvent, SecurityEventType};
use async_trait::async_trait;
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Detector thresholds and factor weights.
///
/// The values are operational defaults, not constants: deployments tune
/// them per traffic profile.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Averaged score at or above this flags an anomaly.
    pub threshold: f64,
    /// Factor for privilege escalation from a non-privileged baseline.
    pub privilege_escalation_factor: f64,
    /// Factor for access to a resource outside the typical set.
    pub unusual_resource_factor: f64,
    /// Factor for activity outside typical hours.
    pub unusual_hour_factor: f64,
    /// Consecutive auth failures at which the streak factor engages.
    pub failure_streak_trigger: u32,
    /// Upper bound for the streak factor.
    pub failure_streak_cap: f64,
    /// Rolling history bound per actor.
    pub history_limit: usize,
    /// Minimum history before typical hours are considered known.
    pub min_history_for_hours: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            privilege_escalation_factor: 0.9,
            unusual_resource_factor: 0.7,
            unusual_hour_factor: 0.5,
            failure_streak_trigger: 5,
            failure_streak_cap: 0.95,
            history_limit: 200,
            min_history_for_hours: 10,
        }
    }
}

/// One observation in an actor's rolling history.
#[derive(Debug, Clone)]
struct HistorySample {
    hour: u32,
    resource: Option<String>,
    auth_attempt: bool,
    auth_success: bool,
    session_minutes: Option<f64>,
}

/// Per-actor statistical profile of normal activity.
#[derive(Debug, Clone, Default)]
pub struct BehavioralBaseline {
    /// Actor key: user id, else source IP.
    pub identifier: String,
    history: VecDeque<HistorySample>,
    /// Consecutive auth failures; resets to zero on success.
    pub consecutive_failures: u32,
    /// Whether this actor has legitimately held privileged access.
    pub privileged: bool,
}

impl BehavioralBaseline {
    fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Self::default()
        }
    }

    /// Success rate over the auth attempts in the rolling history.
    /// `None` until at least one attempt is recorded.
    pub fn auth_success_rate(&self) -> Option<f64> {
        let attempts = self.history.iter().filter(|s| s.auth_attempt).count();
        if attempts == 0 {
            return None;
        }
        let successes = self.history.iter().filter(|s| s.auth_success).count();
        Some(successes as f64 / attempts as f64)
    }

    /// Hours of day seen in the history. Only meaningful once the history
    /// is deep enough; see [`AnomalyConfig::min_history_for_hours`].
    pub fn typical_hours(&self) -> HashSet<u32> {
        self.history.iter().map(|s| s.hour).collect()
    }

    /// Resources seen at least twice in the history.
    pub fn typical_resources(&self) -> HashSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sample in &self.history {
            if let Some(resource) = &sample.resource {
                *counts.entry(resource.as_str()).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(r, _)| r.to_string())
            .collect()
    }

    /// Mean session length over the history, when sessions were observed.
    pub fn mean_session_minutes(&self) -> Option<f64> {
        let lengths: Vec<f64> = self
            .history
            .iter()
            .filter_map(|s| s.session_minutes)
            .collect();
        if lengths.is_empty() {
            return None;
        }
        Some(lengths.iter().sum::<f64>() / lengths.len() as f64)
    }

    /// Number of samples currently held.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn observe(&mut self, event: &SecurityEvent, limit: usize) {
        let auth_attempt = matches!(
            event.event_type,
            SecurityEventType::AuthenticationSuccess | SecurityEventType::AuthenticationFailure
        );
        let auth_success = event.event_type == SecurityEventType::AuthenticationSuccess;

        if auth_attempt {
            if auth_success {
                self.consecutive_failures = 0;
            } else {
                self.consecutive_failures += 1;
            }
        }
        if event.outcome == EventOutcome::Success
            && event
                .details
                .get("privileged")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        {
            self.privileged = true;
        }

        self.history.push_back(HistorySample {
            hour: event.timestamp.hour(),
            resource: event.resource.clone(),
            auth_attempt,
            auth_success,
            session_minutes: event
                .details
                .get("session_minutes")
                .and_then(|v| v.as_f64()),
        });
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

/// Score assigned to one event against its actor's baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScore {
    /// Scored event.
    pub event_id: Uuid,
    /// Averaged factor score in `[0, 1]`.
    pub score: f64,
    /// Threshold the score was compared against.
    pub threshold: f64,
    /// Contributing factors by name.
    pub factors: HashMap<String, f64>,
    /// Human-readable factor explanations.
    pub reasoning: Vec<String>,
    /// Whether the score crossed the threshold.
    pub is_anomaly: bool,
}

/// Scores events against per-actor baselines.
///
/// Baselines are keyed per actor and updated independently, so no
/// cross-actor locking is needed beyond the map itself.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    baselines: RwLock<HashMap<String, BehavioralBaseline>>,
    recent_anomalies: RwLock<VecDeque<AnomalyScore>>,
}

impl AnomalyDetector {
    /// Creates a detector with the given configuration.
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            baselines: RwLock::new(HashMap::new()),
            recent_anomalies: RwLock::new(VecDeque::new()),
        }
    }

    /// Scores an event against its actor's baseline, then folds the event
    /// into the baseline. Events with no actor score zero.
    pub async fn score_event(&self, event: &SecurityEvent) -> AnomalyScore {
        let Some(actor) = event.actor_key() else {
            return AnomalyScore {
                event_id: event.id,
                score: 0.0,
                threshold: self.config.threshold,
                factors: HashMap::new(),
                reasoning: vec!["event carries no actor identity".to_string()],
                is_anomaly: false,
            };
        };

        let mut baselines = self.baselines.write().await;
        let baseline = baselines
            .entry(actor.clone())
            .or_insert_with(|| BehavioralBaseline::new(&actor));

        let score = self.score_against(event, baseline);
        baseline.observe(event, self.config.history_limit);
        drop(baselines);

        if score.is_anomaly {
            warn!(
                event_id = %event.id,
                actor = %actor,
                score = score.score,
                "Behavioral anomaly detected"
            );
            let mut recent = self.recent_anomalies.write().await;
            recent.push_back(score.clone());
            while recent.len() > 100 {
                recent.pop_front();
            }
        } else {
            debug!(event_id = %event.id, actor = %actor, score = score.score, "Event scored");
        }
        score
    }

    fn score_against(&self, event: &SecurityEvent, baseline: &BehavioralBaseline) -> AnomalyScore {
        let cfg = &self.config;
        let mut factors = HashMap::new();
        let mut reasoning = Vec::new();

        let is_auth_failure = event.event_type == SecurityEventType::AuthenticationFailure;

        if is_auth_failure {
            if let Some(rate) = baseline.auth_success_rate() {
                let factor = 1.0 - rate;
                factors.insert("auth_failure".to_string(), factor);
                reasoning.push(format!(
                    "auth failure against a {:.0}% historical success rate",
                    rate * 100.0
                ));
            }
        }

        if event.event_type == SecurityEventType::PrivilegeEscalation && !baseline.privileged {
            factors.insert(
                "privilege_escalation".to_string(),
                cfg.privilege_escalation_factor,
            );
            reasoning.push("privilege escalation from a non-privileged baseline".to_string());
        }

        if let Some(resource) = &event.resource {
            let typical = baseline.typical_resources();
            if !typical.is_empty() && !typical.contains(resource) {
                factors.insert("unusual_resource".to_string(), cfg.unusual_resource_factor);
                reasoning.push(format!("access to atypical resource {}", resource));
            }
        }

        if baseline.history_len() >= cfg.min_history_for_hours {
            let hour = event.timestamp.hour();
            if !baseline.typical_hours().contains(&hour) {
                factors.insert("unusual_hour".to_string(), cfg.unusual_hour_factor);
                reasoning.push(format!("activity at atypical hour {:02}:00", hour));
            }
        }

        let effective_streak = baseline.consecutive_failures + u32::from(is_auth_failure);
        if effective_streak >= cfg.failure_streak_trigger {
            let factor =
                (0.5 + 0.1 * effective_streak as f64).min(cfg.failure_streak_cap);
            factors.insert("failure_streak".to_string(), factor);
            reasoning.push(format!(
                "{} consecutive authentication failures",
                effective_streak
            ));
        }

        let score = if factors.is_empty() {
            0.0
        } else {
            factors.values().sum::<f64>() / factors.len() as f64
        };

        AnomalyScore {
            event_id: event.id,
            score,
            threshold: cfg.threshold,
            factors,
            reasoning,
            is_anomaly: score >= cfg.threshold,
        }
    }

    /// Returns the baseline for one actor, if any.
    pub async fn baseline(&self, actor: &str) -> Option<BehavioralBaseline> {
        self.baselines.read().await.get(actor).cloned()
    }

    /// Returns up to the last 100 detected anomalies, oldest first.
    pub async fn recent_anomalies(&self) -> Vec<AnomalyScore> {
        self.recent_anomalies.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl EventListener for AnomalyDetector {
    fn name(&self) -> &str {
        "anomaly-detector"
    }

    async fn on_event(&self, event: &SecurityEvent) -> Result<(), ListenerError> {
        self.score_event(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::Severity;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    fn auth_event(success: bool, user: &str) -> SecurityEvent {
        let event_type = if success {
            SecurityEventType::AuthenticationSuccess
        } else {
            SecurityEventType::AuthenticationFailure
        };
        SecurityEvent::new(event_type, Severity::Warning).with_user(user)
    }

    #[tokio::test]
    async fn test_auth_failure_factor_is_one_minus_success_rate() {
        let detector = detector();
        // 97 successes, 3 failures: success rate 0.97.
        for _ in 0..97 {
            detector.score_event(&auth_event(true, "alice")).await;
        }
        for _ in 0..3 {
            detector.score_event(&auth_event(false, "alice")).await;
        }
        let baseline = detector.baseline("alice").await.unwrap();
        assert!((baseline.auth_success_rate().unwrap() - 0.97).abs() < 1e-9);

        let score = detector.score_event(&auth_event(false, "alice")).await;
        let factor = score.factors["auth_failure"];
        assert!((factor - 0.03).abs() < 1e-9);
        assert!(!score.is_anomaly);
    }

    #[tokio::test]
    async fn test_failure_streak_caps_and_flags_anomaly() {
        let detector = detector();
        // Four failures recorded; the fifth makes the effective streak 5.
        for _ in 0..4 {
            detector.score_event(&auth_event(false, "mallory")).await;
        }
        let score = detector.score_event(&auth_event(false, "mallory")).await;

        assert!((score.factors["failure_streak"] - 0.95).abs() < 1e-9);
        // Success rate is 0.0 for an all-failure history.
        assert!((score.factors["auth_failure"] - 1.0).abs() < 1e-9);
        assert!(score.score >= 0.7);
        assert!(score.is_anomaly);
    }

    #[tokio::test]
    async fn test_streak_resets_on_success() {
        let detector = detector();
        for _ in 0..4 {
            detector.score_event(&auth_event(false, "bob")).await;
        }
        detector.score_event(&auth_event(true, "bob")).await;
        let baseline = detector.baseline("bob").await.unwrap();
        assert_eq!(baseline.consecutive_failures, 0);

        let score = detector.score_event(&auth_event(false, "bob")).await;
        assert!(!score.factors.contains_key("failure_streak"));
    }

    #[tokio::test]
    async fn test_privilege_escalation_from_non_privileged_baseline() {
        let detector = detector();
        detector.score_event(&auth_event(true, "carol")).await;

        let event = SecurityEvent::new(SecurityEventType::PrivilegeEscalation, Severity::Critical)
            .with_user("carol");
        let score = detector.score_event(&event).await;
        assert!((score.factors["privilege_escalation"] - 0.9).abs() < 1e-9);
        assert!(score.is_anomaly);
    }

    #[tokio::test]
    async fn test_privileged_baseline_suppresses_escalation_factor() {
        let detector = detector();
        let admin_event = SecurityEvent::new(
            SecurityEventType::AuthenticationSuccess,
            Severity::Info,
        )
        .with_user("root-admin")
        .with_detail("privileged", serde_json::json!(true));
        detector.score_event(&admin_event).await;

        let event = SecurityEvent::new(SecurityEventType::PrivilegeEscalation, Severity::Critical)
            .with_user("root-admin");
        let score = detector.score_event(&event).await;
        assert!(!score.factors.contains_key("privilege_escalation"));
    }

    #[tokio::test]
    async fn test_unusual_resource_needs_an_established_set() {
        let detector = detector();
        let access = |resource: &str| {
            SecurityEvent::new(SecurityEventType::DataAccess, Severity::Info)
                .with_user("dave")
                .with_resource(resource)
        };

        // First touches: no typical set yet, no factor.
        let score = detector.score_event(&access("/records/a")).await;
        assert!(!score.factors.contains_key("unusual_resource"));
        detector.score_event(&access("/records/a")).await;
        detector.score_event(&access("/records/a")).await;

        // Typical set now exists; a new resource is flagged.
        let score = detector.score_event(&access("/secrets/all")).await;
        assert!((score.factors["unusual_resource"] - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_actor_scores_zero() {
        let detector = detector();
        let event = SecurityEvent::new(SecurityEventType::RateLimitExceeded, Severity::Info);
        let score = detector.score_event(&event).await;
        assert_eq!(score.score, 0.0);
        assert!(!score.is_anomaly);
    }

    #[tokio::test]
    async fn test_factors_are_averaged_not_summed() {
        let config = AnomalyConfig {
            threshold: 2.0, // keep is_anomaly out of the way
            ..AnomalyConfig::default()
        };
        let detector = AnomalyDetector::new(config);
        for _ in 0..5 {
            detector.score_event(&auth_event(false, "eve")).await;
        }
        let score = detector.score_event(&auth_event(false, "eve")).await;

        let sum: f64 = score.factors.values().sum();
        let avg = sum / score.factors.len() as f64;
        assert!((score.score - avg).abs() < 1e-9);
        assert!(score.score < sum);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let config = AnomalyConfig {
            history_limit: 10,
            ..AnomalyConfig::default()
        };
        let detector = AnomalyDetector::new(config);
        for _ in 0..50 {
            detector.score_event(&auth_event(true, "frank")).await;
        }
        let baseline = detector.baseline("frank").await.unwrap();
        assert_eq!(baseline.history_len(), 10);
    }

    #[tokio::test]
    async fn test_baselines_keyed_by_ip_when_no_user() {
        let detector = detector();
        let event = SecurityEvent::new(SecurityEventType::AuthenticationFailure, Severity::Warning)
            .with_source_ip("198.51.100.7".parse().unwrap());
        detector.score_event(&event).await;
        assert!(detector.baseline("198.51.100.7").await.is_some());
    }
}
