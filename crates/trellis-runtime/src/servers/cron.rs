//! Scheduled task server.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use trellis_core::{Engine, Services};
use trellis_cron::{CronTask, Processor, ProcessorState, Task};

use crate::config::{AclConfig, CronConfig, ServerConfig};
use crate::error::RuntimeResult;

/// Runs configured tasks on a time wheel. Clones share the wheel.
#[derive(Debug, Clone)]
pub struct CronServer {
    processor: Processor,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CronServer {
    /// Builds the wheel and schedules the configured tasks.
    pub fn from_config(
        server: &ServerConfig,
        acl: &AclConfig,
        cron: &CronConfig,
        services: Services,
    ) -> RuntimeResult<Self> {
        let engine = super::build_engine(server, acl)?;
        let processor = Processor::with_wheel(engine, services, cron.span(), cron.length)?;
        processor.add(cron.tasks.iter().cloned())?;
        Ok(Self {
            processor,
            handle: Arc::new(Mutex::new(None)),
        })
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn engine(&self) -> &Engine {
        self.processor.engine()
    }

    /// Brings the scheduled tasks in line with `cron`.
    ///
    /// Tasks whose definition is unchanged keep their place in the wheel.
    /// Changed, disabled and dropped tasks are removed by name; changed and
    /// new tasks are then added. Wheel dimensions cannot change at runtime.
    pub fn apply(&self, cron: &CronConfig) -> RuntimeResult<()> {
        self.check(cron)?;
        if cron.span() != self.processor.span() || cron.length != self.processor.length() {
            warn!(
                span_ms = cron.span_ms,
                length = cron.length,
                "Wheel dimensions changed, restart to apply"
            );
        }

        let scheduled = self.processor.tasks();
        let mut kept = HashSet::new();
        let mut removed = HashSet::new();
        for instance in &scheduled {
            let name = instance.task().name();
            let unchanged = cron
                .tasks
                .iter()
                .any(|task| !task.disable && same_definition(task, instance));
            if unchanged {
                kept.insert(name.to_string());
            } else if removed.insert(name.to_string()) {
                self.processor.remove(name);
            }
        }

        let added: Vec<Task> = cron
            .tasks
            .iter()
            .filter(|task| !kept.contains(task.name()))
            .cloned()
            .collect();
        info!(
            kept = kept.len(),
            removed = removed.len(),
            added = added.len(),
            "Tasks applied"
        );
        self.processor.add(added)?;
        Ok(())
    }

    /// Checks that every enabled task in `cron` would schedule, without
    /// changing the wheel.
    pub fn check(&self, cron: &CronConfig) -> RuntimeResult<()> {
        Ok(self.processor.check(&cron.tasks)?)
    }

    /// Starts the wheel. Later calls are no-ops.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_none() {
            *handle = Some(self.processor.start());
        }
    }

    pub fn pause(&self) -> RuntimeResult<()> {
        Ok(self.processor.pause()?)
    }

    pub fn resume(&self) -> RuntimeResult<()> {
        Ok(self.processor.resume()?)
    }

    pub fn state(&self) -> ProcessorState {
        self.processor.state()
    }

    /// Closes the wheel and waits for the tick loop to exit.
    pub async fn close(&self) {
        self.processor.close();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Cron loop ended abnormally");
        }
    }
}

fn same_definition(task: &Task, instance: &CronTask) -> bool {
    let scheduled = instance.task();
    task.name() == scheduled.name()
        && task.service == scheduled.service
        && task.cron == scheduled.cron
        && task.method.eq_ignore_ascii_case(&scheduled.method)
        && task.form == scheduled.form
        && task.header == scheduled.header
}
