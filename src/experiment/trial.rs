//! trial.rs
//! Trial sequencer: runs its conditions strictly in order and brackets each one with
//! metadata markers sharing the trial's correlation key.

use std::time::{Duration, Instant};
use log::{info, warn};

use crate::condition::{Condition, ConditionKind};
use crate::stimulus::channel::{Channel, CorrelationKey, Message, MetaTag};
use crate::utils::{
    error::{Diagnostic, ExperimentError, Result},
    metrics::FeedbackReport,
};

#[derive(Debug, Clone)]
pub struct Trial {
    id: String,
    comment: Option<String>,
    conditions: Vec<Condition>,
    diagnostics: Vec<Diagnostic>,
}

/// What happened in one condition of a trial run.
#[derive(Debug, Clone)]
pub struct ConditionReport {
    /// `<trial id>.<index>`, the same label as the condition markers.
    pub label: String,
    pub kind: ConditionKind,
    pub elapsed: Duration,
    pub feedback: Option<FeedbackReport>,
}

#[derive(Debug, Clone)]
pub struct TrialReport {
    pub trial_id: String,
    pub elapsed: Duration,
    pub conditions: Vec<ConditionReport>,
}

impl TrialReport {
    pub fn feedback(&self) -> impl Iterator<Item = (&str, &FeedbackReport)> {
        self.conditions
            .iter()
            .filter_map(|c| c.feedback.as_ref().map(|f| (c.label.as_str(), f)))
    }
}

impl Trial {
    /// A trial without conditions is rejected.
    pub fn new(id: impl Into<String>, comment: Option<String>, conditions: Vec<Condition>) -> Result<Self> {
        let id = id.into();
        if conditions.is_empty() {
            return Err(ExperimentError::EmptyTrial(id));
        }
        let diagnostics = conditions.iter().flat_map(Condition::diagnostics).collect();
        Ok(Self { id, comment, conditions, diagnostics })
    }

    pub(crate) fn with_diagnostics(mut self, extra: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(extra);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn minimum_runtime(&self) -> Duration {
        self.conditions.iter().map(Condition::minimum_runtime).sum()
    }

    /// Blocks until every condition has finished.
    pub fn trigger(&self, channel: &dyn Channel) -> TrialReport {
        let shared_key = CorrelationKey::now();
        let started = Instant::now();
        info!("[Trial] {} start ({} conditions)", self.id, self.conditions.len());

        channel.emit(Message::meta(shared_key, MetaTag::TrialStart, self.id.as_str()));
        if let Some(comment) = &self.comment {
            channel.emit(Message::meta(shared_key, MetaTag::Comment, comment.as_str()));
        }

        let mut conditions = Vec::with_capacity(self.conditions.len());
        for (index, condition) in self.conditions.iter().enumerate() {
            let label = format!("{}.{}", self.id, index);
            channel.emit(Message::meta(shared_key, MetaTag::ConditionType, condition.kind().as_str()));
            channel.emit(Message::meta(shared_key, MetaTag::ConditionStart, label.as_str()));

            let condition_started = Instant::now();
            let feedback = condition.trigger(channel);
            if feedback.as_ref().is_some_and(|f| !f.connected) {
                warn!("[Trial] {label} ran closed loop without sensor feedback");
            }

            channel.emit(Message::meta(shared_key, MetaTag::ConditionEnd, label.as_str()));
            conditions.push(ConditionReport {
                label,
                kind: condition.kind(),
                elapsed: condition_started.elapsed(),
                feedback,
            });
        }

        channel.emit(Message::meta(shared_key, MetaTag::TrialEnd, self.id.as_str()));
        let elapsed = started.elapsed();
        info!("[Trial] {} end after {:.2?}", self.id, elapsed);
        TrialReport { trial_id: self.id.clone(), elapsed, conditions }
    }
}
