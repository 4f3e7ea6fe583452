//! The bounded worker pool driving [TaskStep]s to completion. Steps are
//! handed out to up to `concurrency` workers; every worker
//! reports its resulting [TaskEvent] back over a single channel so that
//! `ctx.post_event` — and therefore the entire reducer — only ever runs on
//! one task, preserving the single-writer discipline the engine relies on
//! for correctness without needing a lock around [TaskEventContext].

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::{
    context::TaskEventContext, event::TaskEvent, logger::Logger, misc::CTRLC_ISSUED,
    runtime::RuntimeAdapter, step::TaskStep, step_runner::StepRunner,
};

/// Default worker concurrency: one worker per logical core unless the
/// caller overrides it.
pub fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

pub struct Dispatcher {
    runtime: Arc<dyn RuntimeAdapter>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, concurrency: usize) -> Self {
        Self {
            runtime,
            concurrency: concurrency.max(1),
        }
    }

    /// Drives `ctx` from its initial `TaskStarted` event (already posted by
    /// the caller) until a `FinishTask` step is popped, or the run is
    /// cancelled. Returns once the event log is quiescent.
    pub async fn run(&self, ctx: &mut TaskEventContext, logger: &dyn Logger) {
        let step_runner = Arc::new(StepRunner::new(self.runtime.clone()));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaskEvent>();

        let mut in_flight: usize = 0;

        loop {
            // cancellation: a Ctrl+C flips this monotonic flag; the reducer
            // is asked to abort exactly as if a failure had just occurred, so
            // already-created resources still converge through the normal
            // cleanup path instead of being abandoned.
            if CTRLC_ISSUED.load(std::sync::atomic::Ordering::SeqCst) && !ctx.is_aborting() {
                ctx.set_aborting();
                logger.log_cancelled();
                for name in ctx.created_container_names() {
                    if !ctx.is_container_terminal(&name) {
                        if let Some(rc) = ctx.runtime_container_of(&name).cloned() {
                            let container = ctx.container(&name).unwrap().clone();
                            ctx.queue_step(TaskStep::CleanUpContainer {
                                container,
                                runtime_container: rc,
                            });
                        }
                    }
                }
            }

            // spawn as many ready steps as the pool has room for
            while in_flight < self.concurrency {
                let Some(step) = ctx.pop_ready_step() else { break };
                match step {
                    TaskStep::BeginTask => {
                        logger.log_step_started(&step);
                        continue;
                    }
                    TaskStep::DisplayTaskFailure(message) => {
                        logger.log_failure(&message);
                        continue;
                    }
                    TaskStep::FinishTask => {
                        logger.log_finished();
                        return;
                    }
                    other => {
                        logger.log_step_started(&other);
                        let permit = semaphore.clone().acquire_owned().await.unwrap();
                        let runner = step_runner.clone();
                        let tx = event_tx.clone();
                        let logger_progress = logger.progress_sink();
                        in_flight += 1;
                        tokio::spawn(async move {
                            let _permit = permit;
                            let on_progress = move |name: String, step_n: u64, total: u64, msg: String| {
                                logger_progress.report(&name, step_n, total, &msg);
                            };
                            // every non-terminal, non-display step yields an
                            // event; `execute` only returns `None` for the
                            // three steps already handled above
                            if let Some(event) = runner.execute(other, &on_progress).await {
                                let _ = tx.send(event);
                            }
                        });
                    }
                }
            }

            if in_flight == 0 && !ctx.has_ready_steps() {
                // nothing in flight and nothing queued: the run is stuck
                // (should not happen if every event handler converges, but
                // guards against silently hanging forever)
                logger.log_finished();
                return;
            }

            match event_rx.recv().await {
                Some(event) => {
                    in_flight -= 1;
                    logger.log_event(&event);
                    ctx.post_event(event);
                }
                None => return,
            }
        }
    }
}
