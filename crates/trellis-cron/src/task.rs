//! Task definitions and scheduled task instances.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use trellis_core::{Form, Header, Request};

use crate::error::{CronError, CronResult};
use crate::schedule::{self, BoxedSchedule};

fn default_method() -> String {
    "GET".to_string()
}

/// A configured recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Name used by `remove`. Defaults to the service path.
    #[serde(default)]
    pub name: String,

    /// Service path dispatched on every fire.
    pub service: String,

    /// Schedule expression, see [`schedule::parse`].
    pub cron: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Disabled tasks are skipped when configuration is applied.
    #[serde(default)]
    pub disable: bool,

    /// Form parameters handed to the service.
    #[serde(default)]
    pub form: Form,

    #[serde(default)]
    pub header: Header,
}

impl Task {
    pub fn new(service: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            service: service.into(),
            cron: cron.into(),
            method: default_method(),
            disable: false,
            form: Form::new(),
            header: Header::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_form(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.form.insert(key.into(), value.into());
        self
    }

    /// The effective task name.
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            &self.service
        } else {
            &self.name
        }
    }
}

/// A task instance living in the wheel.
///
/// The instance is also the request value dispatched through the engine.
pub struct CronTask {
    task: Task,
    schedule: BoxedSchedule,
    round: AtomicU64,
    executed: AtomicU64,
    disabled: AtomicBool,
}

impl CronTask {
    /// Parses the task's schedule.
    pub fn new(task: Task) -> CronResult<Self> {
        let schedule = schedule::parse(&task.cron).map_err(|reason| CronError::InvalidSchedule {
            task: task.name().to_string(),
            expr: task.cron.clone(),
            reason,
        })?;
        Ok(Self::with_schedule(task, schedule))
    }

    pub fn with_schedule(mut task: Task, schedule: BoxedSchedule) -> Self {
        task.method = task.method.to_ascii_uppercase();
        Self {
            task,
            schedule,
            round: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn schedule(&self) -> &BoxedSchedule {
        &self.schedule
    }

    /// Remaining full revolutions before the task is due.
    pub fn round(&self) -> u64 {
        self.round.load(Ordering::Acquire)
    }

    pub(crate) fn set_round(&self, round: u64) {
        self.round.store(round, Ordering::Release);
    }

    /// Spends one revolution. Returns `false` if the task is already due.
    pub(crate) fn spend_round(&self) -> bool {
        self.round
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
            .is_ok()
    }

    /// Number of times the task's service was invoked.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_executed(&self) -> u64 {
        self.executed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }
}

impl Request for CronTask {
    fn method(&self) -> &str {
        &self.task.method
    }

    fn service(&self) -> &str {
        &self.task.service
    }

    fn header(&self) -> &Header {
        &self.task.header
    }

    fn form(&self) -> &Form {
        &self.task.form
    }

    fn name(&self) -> &str {
        self.task.name()
    }
}

impl std::fmt::Debug for CronTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronTask")
            .field("name", &self.task.name())
            .field("service", &self.task.service)
            .field("cron", &self.task.cron)
            .field("round", &self.round())
            .field("executed", &self.executed())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_defaults_to_service() {
        let task = Task::new("/report/daily", "@daily");
        assert_eq!(task.name(), "/report/daily");
        assert_eq!(task.with_name("report").name(), "report");
    }

    #[test]
    fn deserializes_with_defaults() {
        let task: Task = serde_json::from_str(r#"{"service": "/sync", "cron": "@every 5s"}"#).unwrap();
        assert_eq!(task.method, "GET");
        assert!(!task.disable);
        assert!(task.form.is_empty());
    }

    #[test]
    fn invalid_schedule_names_the_task() {
        let err = CronTask::new(Task::new("/sync", "bogus").with_name("sync")).unwrap_err();
        assert!(matches!(err, CronError::InvalidSchedule { ref task, .. } if task == "sync"));
    }

    #[test]
    fn rounds_never_go_negative() {
        let task = CronTask::new(Task::new("/sync", "@every 1s")).unwrap();
        task.set_round(1);
        assert!(task.spend_round());
        assert!(!task.spend_round());
        assert_eq!(task.round(), 0);
    }

    #[test]
    fn dispatches_as_request() {
        let task = CronTask::new(Task::new("/sync", "@every 1s").with_method("post").with_form("full", true)).unwrap();
        assert_eq!(Request::method(&task), "POST");
        assert_eq!(task.form().get("full"), Some(&serde_json::Value::Bool(true)));
    }
}
