//! Supervisor — the poll loop and its lifecycle.
//!
//! One background task samples load on a fixed interval and runs the
//! decision and handoff for each sample before the next tick may start.
//! All mutable state sits behind one async mutex held for a whole tick;
//! `stop()` cancels the task before touching it.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use loadshift_core::{LoadSample, LoadshiftConfig, ScalingConfig};
use loadshift_probe::PrimaryClient;
use loadshift_scale::{ScaleAction, ScalingPolicy};
use loadshift_worker::{WorkerManager, WorkerSpec};

use crate::collab::{AuthoritySwitch, LoadSource, WorkerControl};
use crate::error::{FatalError, SupervisorError, TickError};
use crate::handoff::{HandoffCoordinator, HandoffPhase};

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub is_monitoring: bool,
    /// Checked live by `status()` unless a tick is in progress, in which
    /// case it is the value the last tick published.
    pub worker_running: bool,
    pub consecutive_error_count: u32,
    pub phase: HandoffPhase,
    pub last_action: Option<ScaleAction>,
    pub last_sample: Option<LoadSample>,
    pub last_error: Option<String>,
    /// Set when monitoring ended without `stop()`.
    pub fatal: Option<FatalError>,
    pub config: ScalingConfig,
}

impl SupervisorStatus {
    fn idle(config: ScalingConfig) -> Self {
        Self {
            is_monitoring: false,
            worker_running: false,
            consecutive_error_count: 0,
            phase: HandoffPhase::Integrated,
            last_action: None,
            last_sample: None,
            last_error: None,
            fatal: None,
            config,
        }
    }
}

/// State owned by whoever holds the tick lock.
struct Core<A, W> {
    coordinator: HandoffCoordinator<A, W>,
    consecutive_errors: u32,
}

/// The running poll loop.
struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared<S, A, W> {
    config: ScalingConfig,
    policy: ScalingPolicy,
    source: S,
    core: Mutex<Core<A, W>>,
    status_tx: watch::Sender<SupervisorStatus>,
    run: Mutex<Option<LoopHandle>>,
}

/// Scales the delegated duty between the primary and a worker process.
pub struct Supervisor<S, A, W> {
    shared: Arc<Shared<S, A, W>>,
}

impl Supervisor<PrimaryClient, PrimaryClient, WorkerManager> {
    /// Wire the HTTP client and worker manager from a config file.
    pub fn from_config(config: &LoadshiftConfig) -> Result<Self, SupervisorError> {
        let client = PrimaryClient::from_config(&config.primary)?;
        let worker = WorkerManager::new(WorkerSpec::from_config(&config.worker)?);

        Self::new(
            config.scaling.clone(),
            client.clone(),
            HandoffCoordinator::new(client, worker, config.handoff.settle_delay()),
        )
    }
}

impl<S, A, W> Supervisor<S, A, W>
where
    S: LoadSource,
    A: AuthoritySwitch,
    W: WorkerControl,
{
    /// Rejects a scaling config the poll loop cannot run with.
    pub fn new(
        config: ScalingConfig,
        source: S,
        coordinator: HandoffCoordinator<A, W>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;

        let (status_tx, _) = watch::channel(SupervisorStatus::idle(config.clone()));
        Ok(Self {
            shared: Arc::new(Shared {
                policy: ScalingPolicy::from_config(&config),
                config,
                source,
                core: Mutex::new(Core {
                    coordinator,
                    consecutive_errors: 0,
                }),
                status_tx,
                run: Mutex::new(None),
            }),
        })
    }

    /// Begin monitoring. The first sample is taken immediately.
    ///
    /// A warning no-op if the supervisor is already monitoring.
    pub async fn start(&self) {
        let mut run = self.shared.run.lock().await;
        if let Some(handle) = run.take() {
            if self.shared.status_tx.borrow().is_monitoring && !handle.task.is_finished() {
                warn!("supervisor already monitoring, start ignored");
                *run = Some(handle);
                return;
            }
            // The previous loop ended on its own and is only unwinding.
            let _ = handle.task.await;
        }

        self.shared.core.lock().await.consecutive_errors = 0;
        self.shared.status_tx.send_modify(|status| {
            status.is_monitoring = true;
            status.consecutive_error_count = 0;
            status.last_error = None;
            status.fatal = None;
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(Arc::clone(&self.shared), shutdown_rx));
        *run = Some(LoopHandle { shutdown_tx, task });

        info!(
            threshold = self.shared.config.load_threshold,
            interval_ms = self.shared.config.poll_interval_ms,
            max_errors = self.shared.config.max_consecutive_errors,
            "supervisor started"
        );
    }

    /// Stop monitoring and release everything the supervisor owns.
    ///
    /// Safe at any time, including in the middle of a handoff: the loop
    /// is cancelled first, then authority is reclaimed and the worker is
    /// stopped regardless of which transition was under way.
    pub async fn stop(&self) {
        let handle = self.shared.run.lock().await.take();
        match handle {
            Some(handle) => {
                let _ = handle.shutdown_tx.send(true);
                handle.task.abort();
                let _ = handle.task.await;
            }
            None => debug!("stop called while not monitoring"),
        }

        let mut core = self.shared.core.lock().await;
        core.coordinator.teardown().await;
        self.shared.publish(&mut core, |status| status.is_monitoring = false);
        info!("supervisor stopped");
    }

    pub fn status(&self) -> SupervisorStatus {
        let mut status = self.shared.status_tx.borrow().clone();
        if let Ok(mut core) = self.shared.core.try_lock() {
            status.worker_running = core.coordinator.worker_alive();
        }
        status
    }

    /// Resolve once monitoring has ended.
    ///
    /// Returns the terminal error if the loop gave up or died on its own,
    /// `Ok` after an explicit `stop()` or when not monitoring at all.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        let mut status_rx = self.shared.status_tx.subscribe();
        let fatal = match status_rx.wait_for(|status| !status.is_monitoring).await {
            Ok(status) => status.fatal.clone(),
            Err(_) => None,
        };

        match fatal {
            Some(fatal) => Err(fatal.into()),
            None => Ok(()),
        }
    }
}

impl<S, A, W> Shared<S, A, W>
where
    S: LoadSource,
    A: AuthoritySwitch,
    W: WorkerControl,
{
    /// Sample once, decide, and hand off if needed.
    async fn tick(&self, core: &mut Core<A, W>) -> Result<(ScaleAction, LoadSample), TickError> {
        let sample = self.source.sample().await.map_err(TickError::Sampling)?;
        core.consecutive_errors = 0;

        let running = core.coordinator.worker_running();
        let action = self.policy.evaluate(&sample, running);

        let result = match action {
            ScaleAction::NoAction => match self.policy.reconcile(&sample, running) {
                Some(target) => core.coordinator.reassert(target).await,
                None => {
                    core.coordinator.observe(sample.reported_state);
                    Ok(())
                }
            },
            _ => core.coordinator.execute(action).await,
        };

        result.map_err(|source| TickError::Handoff { action, source })?;
        Ok((action, sample))
    }

    /// Run one tick and fold its outcome into the counters.
    ///
    /// Returns the fatal condition when the error budget is exhausted;
    /// the worker has been torn down by then.
    async fn poll_once(&self, core: &mut Core<A, W>) -> Option<FatalError> {
        let outcome = self.tick(core).await;

        let mut fatal = None;
        let mut last_error = None;
        let mut completed = None;

        match outcome {
            Ok((action, sample)) => {
                if action != ScaleAction::NoAction {
                    info!(rate = sample.rate, %action, "handoff complete");
                }
                completed = Some((action, sample));
            }
            Err(TickError::Sampling(e)) => {
                core.consecutive_errors += 1;
                let failures = core.consecutive_errors;
                let max = self.config.max_consecutive_errors;
                warn!(failures, max, error = %e, "load sampling failed");
                last_error = Some(e.to_string());

                if failures >= max {
                    error!(failures, "error budget exhausted, shutting down");
                    core.coordinator.teardown().await;
                    fatal = Some(FatalError::ErrorBudgetExhausted {
                        failures,
                        last_error: e.to_string(),
                    });
                }
            }
            Err(e @ TickError::Handoff { .. }) => {
                warn!(error = %e, "handoff rolled back, will retry next tick");
                last_error = Some(e.to_string());
            }
        }

        self.publish(core, |status| {
            if let Some((action, sample)) = completed {
                status.last_action = Some(action);
                status.last_sample = Some(sample);
            }
            if last_error.is_some() {
                status.last_error = last_error;
            }
            if let Some(fatal) = &fatal {
                status.is_monitoring = false;
                status.fatal = Some(fatal.clone());
            }
        });

        fatal
    }

    /// Refresh the derived status fields, then apply `update`.
    fn publish(&self, core: &mut Core<A, W>, update: impl FnOnce(&mut SupervisorStatus)) {
        let worker_running = core.coordinator.worker_running();
        let phase = core.coordinator.phase();
        let errors = core.consecutive_errors;

        self.status_tx.send_modify(|status| {
            status.worker_running = worker_running;
            status.phase = phase;
            status.consecutive_error_count = errors;
            update(status);
        });
    }
}

/// Ends monitoring if the poll task goes away without being stopped or
/// giving up on its own: a panic, or the runtime dropping the task.
struct LoopExit<S, A, W>
where
    S: LoadSource,
    A: AuthoritySwitch,
    W: WorkerControl,
{
    shared: Arc<Shared<S, A, W>>,
    shutdown: watch::Receiver<bool>,
    finished: bool,
}

impl<S, A, W> Drop for LoopExit<S, A, W>
where
    S: LoadSource,
    A: AuthoritySwitch,
    W: WorkerControl,
{
    fn drop(&mut self) {
        if self.finished || *self.shutdown.borrow() {
            return;
        }

        let reason = if std::thread::panicking() {
            "poll task panicked"
        } else {
            "poll task ended unexpectedly"
        };
        error!(reason, "monitoring ended without stop()");
        self.shared.status_tx.send_modify(|status| {
            status.is_monitoring = false;
            status.fatal = Some(FatalError::PollTaskDied {
                reason: reason.to_string(),
            });
        });

        // An interrupted handoff may have left the worker up or the flag
        // separated.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            runtime.spawn(async move {
                let mut core = shared.core.lock().await;
                core.coordinator.teardown().await;
                shared.publish(&mut core, |_| {});
            });
        }
    }
}

async fn run_loop<S, A, W>(shared: Arc<Shared<S, A, W>>, shutdown: watch::Receiver<bool>)
where
    S: LoadSource,
    A: AuthoritySwitch,
    W: WorkerControl,
{
    let mut exit = LoopExit {
        shared,
        shutdown,
        finished: false,
    };

    let mut interval = tokio::time::interval(exit.shared.config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut core = exit.shared.core.lock().await;
                if let Some(fatal) = exit.shared.poll_once(&mut core).await {
                    error!(error = %fatal, "supervisor stopped itself");
                    break;
                }
            }
            _ = exit.shutdown.changed() => {
                debug!("poll loop shutting down");
                break;
            }
        }
    }

    exit.finished = true;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use loadshift_core::{AuthorityState, StatusChange};
    use loadshift_probe::{ProbeError, ProbeResult};
    use loadshift_worker::{WorkerError, WorkerExit, WorkerResult};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Spawn,
        Stop,
        Switch(AuthorityState),
    }

    /// The primary and the worker process as one observable world.
    struct World {
        flag: AuthorityState,
        worker_running: bool,
        /// `None` entries are failed samples. The last entry repeats.
        rates: VecDeque<Option<f64>>,
        fail_switch: bool,
        fail_spawn: bool,
        spawn_delay: Duration,
        /// The next sample panics instead of answering.
        panic_on_sample: bool,
        events: Vec<Event>,
        /// Times the flag was set to separated with no worker alive.
        violations: u32,
    }

    type SharedWorld = Arc<StdMutex<World>>;

    fn world(rates: &[Option<f64>]) -> SharedWorld {
        Arc::new(StdMutex::new(World {
            flag: AuthorityState::Integrated,
            worker_running: false,
            rates: rates.iter().copied().collect(),
            fail_switch: false,
            fail_spawn: false,
            spawn_delay: Duration::ZERO,
            panic_on_sample: false,
            events: Vec::new(),
            violations: 0,
        }))
    }

    struct FakePrimary(SharedWorld);

    impl LoadSource for FakePrimary {
        fn sample(&self) -> impl Future<Output = ProbeResult<LoadSample>> + Send {
            let world = Arc::clone(&self.0);
            async move {
                if world.lock().unwrap().panic_on_sample {
                    panic!("load source crashed");
                }
                let mut w = world.lock().unwrap();
                let next = if w.rates.len() > 1 {
                    w.rates.pop_front().flatten()
                } else {
                    w.rates.front().copied().flatten()
                };
                match next {
                    Some(rate) => Ok(LoadSample {
                        rate,
                        reported_state: w.flag,
                        sampled_at: 1000,
                    }),
                    None => Err(ProbeError::Timeout {
                        url: "http://primary/load".to_string(),
                        timeout: Duration::from_secs(5),
                    }),
                }
            }
        }
    }

    impl AuthoritySwitch for FakePrimary {
        fn switch_to(
            &self,
            state: AuthorityState,
        ) -> impl Future<Output = ProbeResult<StatusChange>> + Send {
            let world = Arc::clone(&self.0);
            async move {
                let mut w = world.lock().unwrap();
                w.events.push(Event::Switch(state));
                if w.fail_switch {
                    return Err(ProbeError::Status {
                        url: "http://primary/status".to_string(),
                        status: 503,
                    });
                }
                if state == AuthorityState::Separated && !w.worker_running {
                    w.violations += 1;
                }
                let previous = w.flag.as_command();
                w.flag = state;
                Ok(StatusChange {
                    previous_status: previous,
                    current_status: state.as_command(),
                })
            }
        }
    }

    struct FakeWorker(SharedWorld);

    impl WorkerControl for FakeWorker {
        fn spawn_worker(&mut self) -> impl Future<Output = WorkerResult<u32>> + Send {
            let world = Arc::clone(&self.0);
            async move {
                let delay = {
                    let mut w = world.lock().unwrap();
                    w.events.push(Event::Spawn);
                    if w.fail_spawn {
                        return Err(WorkerError::NotReady {
                            timeout: Duration::from_secs(10),
                        });
                    }
                    // The process exists before it is confirmed ready.
                    w.worker_running = true;
                    w.spawn_delay
                };
                tokio::time::sleep(delay).await;
                Ok(4242)
            }
        }

        fn stop_worker(&mut self) -> impl Future<Output = Option<WorkerExit>> + Send {
            let world = Arc::clone(&self.0);
            async move {
                let mut w = world.lock().unwrap();
                if !w.worker_running {
                    return None;
                }
                w.events.push(Event::Stop);
                w.worker_running = false;
                Some(WorkerExit {
                    code: None,
                    signal: Some(15),
                })
            }
        }

        fn worker_alive(&mut self) -> bool {
            self.0.lock().unwrap().worker_running
        }
    }

    type TestSupervisor = Supervisor<FakePrimary, FakePrimary, FakeWorker>;

    fn config(threshold: f64) -> ScalingConfig {
        ScalingConfig {
            load_threshold: threshold,
            poll_interval_ms: 10,
            max_consecutive_errors: 3,
        }
    }

    fn supervisor(world: &SharedWorld, settle: Duration) -> TestSupervisor {
        Supervisor::new(
            config(20.0),
            FakePrimary(Arc::clone(world)),
            HandoffCoordinator::new(
                FakePrimary(Arc::clone(world)),
                FakeWorker(Arc::clone(world)),
                settle,
            ),
        )
        .unwrap()
    }

    /// A supervisor that starts out with a ready worker holding authority.
    fn separated(world: &SharedWorld) {
        let mut w = world.lock().unwrap();
        w.worker_running = true;
        w.flag = AuthorityState::Separated;
    }

    async fn tick(sup: &TestSupervisor) -> Result<ScaleAction, TickError> {
        let mut core = sup.shared.core.lock().await;
        sup.shared.tick(&mut core).await.map(|(action, _)| action)
    }

    async fn poll(sup: &TestSupervisor) -> Option<FatalError> {
        let mut core = sup.shared.core.lock().await;
        sup.shared.poll_once(&mut core).await
    }

    fn count(world: &SharedWorld, event: Event) -> usize {
        world
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| **e == event)
            .count()
    }

    #[tokio::test]
    async fn rising_load_spawns_once() {
        let w = world(&[Some(18.0), Some(25.0), Some(30.0)]);
        let sup = supervisor(&w, Duration::ZERO);

        let mut actions = Vec::new();
        for _ in 0..3 {
            actions.push(tick(&sup).await.unwrap());
        }

        assert_eq!(
            actions,
            vec![ScaleAction::NoAction, ScaleAction::ScaleUp, ScaleAction::NoAction]
        );
        assert_eq!(count(&w, Event::Spawn), 1);
        assert_eq!(w.lock().unwrap().flag, AuthorityState::Separated);
        assert_eq!(sup.shared.core.lock().await.coordinator.phase(), HandoffPhase::Separated);
    }

    #[tokio::test]
    async fn falling_load_reclaims_flag_before_stopping() {
        let w = world(&[Some(15.0), Some(5.0)]);
        separated(&w);
        let sup = supervisor(&w, Duration::ZERO);

        let actions = vec![tick(&sup).await.unwrap(), tick(&sup).await.unwrap()];
        assert_eq!(actions, vec![ScaleAction::ScaleDown, ScaleAction::NoAction]);

        let events = w.lock().unwrap().events.clone();
        assert_eq!(
            events,
            vec![Event::Switch(AuthorityState::Integrated), Event::Stop]
        );
        assert_eq!(w.lock().unwrap().flag, AuthorityState::Integrated);
        assert!(!w.lock().unwrap().worker_running);
    }

    #[tokio::test]
    async fn failing_switch_rolls_back_scale_up() {
        let w = world(&[Some(30.0)]);
        w.lock().unwrap().fail_switch = true;
        let sup = supervisor(&w, Duration::ZERO);

        assert!(poll(&sup).await.is_none());

        let world = w.lock().unwrap();
        assert_eq!(world.events.first(), Some(&Event::Spawn));
        assert_eq!(world.events.last(), Some(&Event::Stop));
        assert_eq!(world.events.iter().filter(|e| **e == Event::Spawn).count(), 1);
        assert_eq!(world.flag, AuthorityState::Integrated);
        assert!(!world.worker_running);
        drop(world);

        let status = sup.status();
        assert_eq!(status.consecutive_error_count, 0);
        assert_eq!(status.phase, HandoffPhase::Integrated);
        assert!(!status.worker_running);
        assert!(status.last_error.unwrap().contains("scale-up aborted"));
    }

    #[tokio::test]
    async fn failing_spawn_never_touches_flag() {
        let w = world(&[Some(30.0)]);
        w.lock().unwrap().fail_spawn = true;
        let sup = supervisor(&w, Duration::ZERO);

        let err = tick(&sup).await.unwrap_err();
        assert!(matches!(
            err,
            TickError::Handoff {
                action: ScaleAction::ScaleUp,
                ..
            }
        ));

        let world = w.lock().unwrap();
        assert_eq!(world.events, vec![Event::Spawn]);
        assert_eq!(world.flag, AuthorityState::Integrated);
    }

    #[tokio::test]
    async fn failing_switch_keeps_worker_on_scale_down() {
        let w = world(&[Some(5.0)]);
        separated(&w);
        w.lock().unwrap().fail_switch = true;
        let sup = supervisor(&w, Duration::ZERO);

        assert!(tick(&sup).await.is_err());
        assert!(w.lock().unwrap().worker_running);
        assert_eq!(count(&w, Event::Stop), 0);

        // Next tick retries the same decision.
        w.lock().unwrap().fail_switch = false;
        assert_eq!(tick(&sup).await.unwrap(), ScaleAction::ScaleDown);
        assert!(!w.lock().unwrap().worker_running);
    }

    #[tokio::test]
    async fn flag_never_separated_without_worker() {
        let rates: Vec<Option<f64>> = (0..40)
            .map(|i| Some(if (i / 3) % 2 == 0 { 50.0 } else { 5.0 }))
            .collect();
        let w = world(&rates);
        let sup = supervisor(&w, Duration::ZERO);

        for i in 0..40 {
            {
                let mut world = w.lock().unwrap();
                world.fail_spawn = i % 5 == 1;
                world.fail_switch = i % 7 == 2;
            }
            let _ = poll(&sup).await;

            let world = w.lock().unwrap();
            assert!(
                !(world.flag == AuthorityState::Separated && !world.worker_running),
                "tick {i}: flag separated with no worker"
            );
        }

        assert_eq!(w.lock().unwrap().violations, 0);
        assert!(count(&w, Event::Spawn) > 1);
    }

    #[tokio::test]
    async fn crashed_worker_returns_authority_when_load_is_low() {
        let w = world(&[Some(5.0)]);
        separated(&w);
        let sup = supervisor(&w, Duration::ZERO);

        // Worker dies on its own.
        w.lock().unwrap().worker_running = false;

        assert_eq!(tick(&sup).await.unwrap(), ScaleAction::NoAction);
        let world = w.lock().unwrap();
        assert_eq!(world.events, vec![Event::Switch(AuthorityState::Integrated)]);
        assert_eq!(world.flag, AuthorityState::Integrated);
    }

    #[tokio::test]
    async fn crashed_worker_is_replaced_when_load_is_high() {
        let w = world(&[Some(50.0)]);
        separated(&w);
        let sup = supervisor(&w, Duration::ZERO);

        w.lock().unwrap().worker_running = false;

        assert_eq!(tick(&sup).await.unwrap(), ScaleAction::ScaleUp);
        let world = w.lock().unwrap();
        assert_eq!(
            world.events,
            vec![Event::Spawn, Event::Switch(AuthorityState::Separated)]
        );
        assert!(world.worker_running);
    }

    #[tokio::test]
    async fn restarted_primary_is_told_to_stand_down_again() {
        let w = world(&[Some(50.0)]);
        w.lock().unwrap().worker_running = true;
        let sup = supervisor(&w, Duration::ZERO);

        assert_eq!(tick(&sup).await.unwrap(), ScaleAction::NoAction);
        assert_eq!(w.lock().unwrap().flag, AuthorityState::Separated);
        assert_eq!(sup.shared.core.lock().await.coordinator.phase(), HandoffPhase::Separated);
    }

    #[tokio::test]
    async fn sampling_errors_count_and_reset() {
        let w = world(&[None, None, Some(5.0), None]);
        let sup = supervisor(&w, Duration::ZERO);

        assert!(poll(&sup).await.is_none());
        assert!(poll(&sup).await.is_none());
        assert_eq!(sup.status().consecutive_error_count, 2);

        assert!(poll(&sup).await.is_none());
        assert_eq!(sup.status().consecutive_error_count, 0);
        assert_eq!(sup.status().last_action, Some(ScaleAction::NoAction));

        assert!(poll(&sup).await.is_none());
        assert_eq!(sup.status().consecutive_error_count, 1);
    }

    #[tokio::test]
    async fn exhausted_error_budget_stops_everything() {
        let w = world(&[None]);
        separated(&w);
        let sup = supervisor(&w, Duration::ZERO);

        sup.start().await;
        assert!(sup.status().is_monitoring);

        let err = tokio::time::timeout(Duration::from_secs(5), sup.wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::ErrorBudgetExhausted { failures: 3, .. }
        ));

        let status = sup.status();
        assert!(!status.is_monitoring);
        assert!(!status.worker_running);
        assert_eq!(status.consecutive_error_count, 3);
        assert!(matches!(
            status.fatal,
            Some(FatalError::ErrorBudgetExhausted { failures: 3, .. })
        ));

        let world = w.lock().unwrap();
        assert!(!world.worker_running);
        assert_eq!(world.flag, AuthorityState::Integrated);
    }

    #[test]
    fn unusable_scaling_config_is_rejected() {
        let w = world(&[Some(5.0)]);
        for config in [
            ScalingConfig {
                poll_interval_ms: 0,
                ..config(20.0)
            },
            ScalingConfig {
                max_consecutive_errors: 0,
                ..config(20.0)
            },
            config(f64::NAN),
        ] {
            let result = Supervisor::new(
                config,
                FakePrimary(Arc::clone(&w)),
                HandoffCoordinator::new(
                    FakePrimary(Arc::clone(&w)),
                    FakeWorker(Arc::clone(&w)),
                    Duration::ZERO,
                ),
            );
            assert!(matches!(result, Err(SupervisorError::Config(_))));
        }
    }

    #[tokio::test]
    async fn panicking_poll_task_ends_monitoring() {
        let w = world(&[Some(50.0)]);
        separated(&w);
        w.lock().unwrap().panic_on_sample = true;
        let sup = supervisor(&w, Duration::ZERO);

        sup.start().await;
        let err = tokio::time::timeout(Duration::from_secs(5), sup.wait())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SupervisorError::PollTaskDied { .. }));

        let status = sup.status();
        assert!(!status.is_monitoring);
        assert!(matches!(status.fatal, Some(FatalError::PollTaskDied { .. })));

        // The worker is torn down in the background.
        for _ in 0..100 {
            if !w.lock().unwrap().worker_running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let world = w.lock().unwrap();
        assert!(!world.worker_running);
        assert_eq!(world.flag, AuthorityState::Integrated);
        drop(world);

        // Monitoring can be resumed once the cause is gone.
        w.lock().unwrap().panic_on_sample = false;
        sup.start().await;
        assert!(sup.status().is_monitoring);
        sup.stop().await;
    }

    #[tokio::test]
    async fn status_sees_worker_crash_between_ticks() {
        let w = world(&[Some(50.0)]);
        let sup = supervisor(&w, Duration::ZERO);

        assert!(poll(&sup).await.is_none());
        assert!(sup.status().worker_running);

        w.lock().unwrap().worker_running = false;
        assert!(!sup.status().worker_running);
    }

    #[tokio::test]
    async fn start_is_not_reentrant() {
        let w = world(&[Some(5.0)]);
        let sup = supervisor(&w, Duration::ZERO);

        sup.start().await;
        sup.start().await;
        assert!(sup.status().is_monitoring);

        sup.stop().await;
        assert!(!sup.status().is_monitoring);
        sup.wait().await.unwrap();
    }

    #[tokio::test]
    async fn restart_after_fatal_clears_error_state() {
        let w = world(&[None]);
        let sup = supervisor(&w, Duration::ZERO);

        sup.start().await;
        assert!(sup.wait().await.is_err());

        w.lock().unwrap().rates = VecDeque::from(vec![Some(5.0)]);
        sup.start().await;
        let status = sup.status();
        assert!(status.is_monitoring);
        assert!(status.fatal.is_none());
        assert_eq!(status.consecutive_error_count, 0);
        sup.stop().await;
    }

    #[tokio::test]
    async fn start_samples_immediately() {
        let w = world(&[Some(50.0)]);
        let sup = Supervisor::new(
            ScalingConfig {
                load_threshold: 20.0,
                poll_interval_ms: 60_000,
                max_consecutive_errors: 3,
            },
            FakePrimary(Arc::clone(&w)),
            HandoffCoordinator::new(
                FakePrimary(Arc::clone(&w)),
                FakeWorker(Arc::clone(&w)),
                Duration::ZERO,
            ),
        )
        .unwrap();

        sup.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(w.lock().unwrap().worker_running);
        assert_eq!(sup.status().phase, HandoffPhase::Separated);
        sup.stop().await;
    }

    #[tokio::test]
    async fn stop_during_scale_up_leaves_no_split_authority() {
        let w = world(&[Some(50.0)]);
        w.lock().unwrap().spawn_delay = Duration::from_millis(500);
        let sup = supervisor(&w, Duration::ZERO);

        sup.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&w, Event::Spawn), 1);

        sup.stop().await;

        let world = w.lock().unwrap();
        assert!(!world.worker_running);
        assert_eq!(world.flag, AuthorityState::Integrated);
        assert_eq!(world.violations, 0);
        drop(world);
        assert_eq!(sup.status().phase, HandoffPhase::Integrated);
    }

    #[tokio::test]
    async fn stop_during_scale_down_settle() {
        let w = world(&[Some(5.0)]);
        separated(&w);
        let sup = supervisor(&w, Duration::from_millis(500));

        sup.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(w.lock().unwrap().flag, AuthorityState::Integrated);

        sup.stop().await;

        let world = w.lock().unwrap();
        assert!(!world.worker_running);
        assert_eq!(world.flag, AuthorityState::Integrated);
        assert_eq!(world.events.iter().filter(|e| **e == Event::Stop).count(), 1);
    }

    #[tokio::test]
    async fn stop_when_idle_is_harmless() {
        let w = world(&[Some(5.0)]);
        let sup = supervisor(&w, Duration::ZERO);

        sup.stop().await;
        sup.stop().await;
        assert!(w.lock().unwrap().events.is_empty());
        assert!(sup.wait().await.is_ok());
    }

    #[test]
    fn status_serializes_for_operators() {
        let status = SupervisorStatus::idle(config(20.0));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["is_monitoring"], false);
        assert_eq!(json["phase"], "integrated");
        assert_eq!(json["config"]["load_threshold"], 20.0);
        assert_eq!(json["config"]["max_consecutive_errors"], 3);
    }
}
