use crate::config::{CollectConfig, RetryConfig};
use crate::error::{CallError, ErrorKind};
use crate::generation::{Generation, Generator, Placeholder, Throttle};
use crate::journal::{self, LogWriter};
use crate::models::{Outcome, Prompt, ResponseRecord, UnitId, WorkUnit};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Expand prompts into work units: prompt-major, then model, then repetition
pub fn expand_work_units(prompts: &[Prompt], models: &[String], repetitions: u32) -> Vec<WorkUnit> {
    prompts
        .iter()
        .flat_map(|prompt| {
            models.iter().flat_map(move |model| {
                (0..repetitions).map(move |repetition_index| WorkUnit {
                    prompt_id: prompt.prompt_id.clone(),
                    prompt_text: prompt.prompt_text.clone(),
                    topic_hint: prompt.topic_hint.clone(),
                    model_name: model.clone(),
                    repetition_index,
                })
            })
        })
        .collect()
}

/// The batches a run will execute, in order
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub planned: usize,
    pub skipped_existing: usize,
    pub batches: Vec<Vec<WorkUnit>>,
}

impl BatchPlan {
    pub fn selected(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Drop already-recorded units, trim to `max_total_requests`, split into
/// batches of `batch_size` and keep at most `max_batches` of them
pub fn plan_batches(units: Vec<WorkUnit>, existing: &HashSet<UnitId>, config: &CollectConfig) -> BatchPlan {
    let planned = units.len();
    let mut pending: Vec<WorkUnit> = units
        .into_iter()
        .filter(|unit| !existing.contains(&unit.id()))
        .collect();
    let skipped_existing = planned - pending.len();

    if let Some(max_total) = config.max_total_requests {
        pending.truncate(max_total);
    }

    let batch_size = config.batch_size.max(1);
    let mut batches: Vec<Vec<WorkUnit>> = Vec::new();
    let mut remaining = pending.into_iter().peekable();
    while remaining.peek().is_some() {
        batches.push(remaining.by_ref().take(batch_size).collect());
    }
    if let Some(max_batches) = config.max_batches {
        batches.truncate(max_batches);
    }

    BatchPlan {
        planned,
        skipped_existing,
        batches,
    }
}

/// Requests a graceful stop: in-flight calls finish, nothing new is dispatched
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (StopHandle(Arc::new(sender)), StopSignal(receiver))
}

/// Counts for one collection run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub planned: usize,
    pub skipped_existing: usize,
    pub selected: usize,
    pub batches_total: usize,
    pub batches_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub records_written: u64,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

enum UnitState {
    Pending,
    InFlight,
    RetryScheduled { error: CallError, delay: Duration },
    Succeeded { generation: Generation, latency: Duration },
    PermanentlyFailed(CallError),
}

/// Everything a worker needs to drive one unit to a terminal record
struct UnitContext<G> {
    generator: G,
    throttle: Throttle,
    retry: RetryConfig,
    call_timeout: Duration,
    dry_run: bool,
}

impl<G: Generator> UnitContext<G> {
    async fn call(&self, unit: &WorkUnit) -> Result<Generation, CallError> {
        match timeout(
            self.call_timeout,
            self.generator.generate(&unit.prompt_text, &unit.model_name),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CallError::new(
                ErrorKind::Timeout,
                format!("no response within {}s", self.call_timeout.as_secs()),
            )),
        }
    }

    async fn drive(&self, unit: &WorkUnit) -> ResponseRecord {
        let mut attempts = 0u32;
        let mut state = UnitState::Pending;

        let (outcome, latency, usage) = loop {
            state = match state {
                UnitState::Pending => UnitState::InFlight,
                UnitState::InFlight => {
                    attempts += 1;
                    self.throttle.wait_turn(&unit.model_name).await;
                    let started = Instant::now();
                    match self.call(unit).await {
                        Ok(generation) => UnitState::Succeeded {
                            generation,
                            latency: started.elapsed(),
                        },
                        Err(error) if error.kind.is_retryable() && attempts <= self.retry.max_retries => {
                            UnitState::RetryScheduled {
                                delay: self.retry.backoff(attempts),
                                error,
                            }
                        }
                        Err(error) => UnitState::PermanentlyFailed(error),
                    }
                }
                UnitState::RetryScheduled { error, delay } => {
                    warn!(
                        prompt_id = %unit.prompt_id,
                        model = %unit.model_name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying"
                    );
                    if error.kind == ErrorKind::RateLimited {
                        self.throttle.back_off(&unit.model_name, delay);
                    } else {
                        sleep(delay).await;
                    }
                    UnitState::InFlight
                }
                UnitState::Succeeded { generation, latency } => {
                    break (
                        Outcome::Success {
                            text: generation.text,
                        },
                        Some(latency),
                        generation.usage,
                    );
                }
                UnitState::PermanentlyFailed(error) => {
                    warn!(
                        prompt_id = %unit.prompt_id,
                        model = %unit.model_name,
                        attempts,
                        %error,
                        "unit failed"
                    );
                    break (Outcome::Failure { error }, None, None);
                }
            };
        };

        let mut record = ResponseRecord::for_unit(unit, outcome);
        record.latency_ms = latency.map(|l| l.as_millis() as u64);
        record.usage = usage;
        record.attempts = Some(attempts);
        record.dry_run = self.dry_run;
        record
    }
}

enum UnitResult {
    Succeeded,
    Failed,
}

/// Drives a collection run: work-unit expansion, batching, bounded concurrency,
/// retries and the append-only response log
pub struct Runner<G> {
    config: CollectConfig,
    context: Arc<UnitContext<G>>,
    stop: StopSignal,
}

impl Runner<Placeholder> {
    /// Runner that writes placeholder records instead of calling a model
    pub fn dry_run(mut config: CollectConfig) -> Result<Self> {
        config.dry_run = true;
        Self::new(config, Placeholder)
    }
}

impl<G: Generator + 'static> Runner<G> {
    /// Create a runner; the configuration is validated before anything else happens
    pub fn new(config: CollectConfig, generator: G) -> Result<Self> {
        config.validate()?;
        let throttle = if config.dry_run {
            Throttle::unlimited()
        } else {
            Throttle::new(config.api.rate_limit_rps)
        };
        let context = UnitContext {
            generator,
            throttle,
            retry: config.retry,
            call_timeout: config.api.request_timeout(),
            dry_run: config.dry_run,
        };
        let (_, stop) = stop_channel();
        Ok(Self {
            config,
            context: Arc::new(context),
            stop,
        })
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Run every selected work unit and append one record per started unit
    pub async fn run(&self, prompts: &[Prompt]) -> Result<RunReport> {
        let config = &self.config;
        let units = expand_work_units(prompts, &config.models, config.repetitions_per_prompt);

        let existing = if config.resume {
            journal::recorded_ids(&config.output_path).with_context(|| {
                format!("Failed to read existing log: {}", config.output_path.display())
            })?
        } else {
            HashSet::new()
        };

        let plan = plan_batches(units, &existing, config);
        let mut report = RunReport {
            planned: plan.planned,
            skipped_existing: plan.skipped_existing,
            selected: plan.selected(),
            batches_total: plan.batches.len(),
            ..RunReport::default()
        };
        info!(
            planned = report.planned,
            skipped_existing = report.skipped_existing,
            selected = report.selected,
            batches = report.batches_total,
            dry_run = config.dry_run,
            "collection planned"
        );

        let writer = LogWriter::open(&config.output_path).await?;
        let total = plan.batches.len();
        for (index, batch) in plan.batches.into_iter().enumerate() {
            if self.stop.is_stopped() {
                report.cancelled += batch.len();
                continue;
            }
            info!(batch = index + 1, of = total, units = batch.len(), "starting batch");
            self.run_batch(batch, writer.sender(), &mut report).await?;
            report.batches_run += 1;
        }
        report.records_written = writer.finish().await?;

        if report.cancelled > 0 {
            warn!(cancelled = report.cancelled, "stop requested, remaining units were not started");
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            written = report.records_written,
            "collection finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        batch: Vec<WorkUnit>,
        sender: mpsc::Sender<ResponseRecord>,
        report: &mut RunReport,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency));
        let mut tasks = JoinSet::new();

        for unit in batch {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Worker pool closed")?;
            if self.stop.is_stopped() {
                report.cancelled += 1;
                continue;
            }

            let context = Arc::clone(&self.context);
            let sender = sender.clone();
            tasks.spawn(async move {
                let _permit = permit;
                debug!(prompt_id = %unit.prompt_id, model = %unit.model_name, repetition = unit.repetition_index, "dispatching");
                let record = context.drive(&unit).await;
                let result = if record.is_success() {
                    UnitResult::Succeeded
                } else {
                    UnitResult::Failed
                };
                sender
                    .send(record)
                    .await
                    .map_err(|_| anyhow::anyhow!("Response log writer stopped"))?;
                Ok::<_, anyhow::Error>(result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined.context("Worker task panicked")?? {
                UnitResult::Succeeded => report.succeeded += 1,
                UnitResult::Failed => report.failed += 1,
            }
        }
        Ok(())
    }
}
