use crate::{
    config::{ProvisionerConfig, TimingConfig},
    events::{Effect, Event},
    executor::AttemptExecutor,
    model::Model,
    types::{AttemptOutcome, Credentials, Snapshot},
    update::update,
};
use anyhow::{Context, Result, anyhow, ensure};
use futures_util::{FutureExt, future::BoxFuture};
use log::{debug, info};
use std::{future::pending, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep},
};

const COMMAND_QUEUE_SIZE: usize = 8;

enum Command {
    Begin {
        credentials: Credentials,
        reply: oneshot::Sender<u64>,
    },
}

/// Handle to a running provisioning event loop
///
/// All session state lives in one tokio task; this handle only sends
/// triggers to it and reads the snapshots it publishes. Dropping the handle
/// (or calling [`Provisioner::shutdown`]) stops the loop and cancels any
/// pending request.
pub struct Provisioner {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl Provisioner {
    /// Start the event loop on the current tokio runtime
    pub fn spawn<E>(executor: Arc<E>, config: &ProvisionerConfig) -> Self
    where
        E: AttemptExecutor + Send + Sync + 'static,
    {
        let model = Model::new(config.session.clone());
        let (snapshot_tx, snapshots) = watch::channel(model.snapshot());
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

        let runtime = Runtime {
            executor,
            timing: config.timing.clone(),
            model,
            snapshots: snapshot_tx,
            attempt: None,
            retry: None,
            dots: None,
            countdown: None,
        };

        let task = tokio::spawn(runtime.run(command_rx));

        Self {
            commands,
            snapshots,
            task,
        }
    }

    /// Trigger provisioning with the given credentials
    ///
    /// Returns the id of the session that is active afterwards. Depending on
    /// the configured re-entry policy a running session is either restarted
    /// (new id) or kept (its id is returned).
    pub async fn begin_provisioning(&self, credentials: Credentials) -> Result<u64> {
        let (reply, session) = oneshot::channel();

        self.commands
            .send(Command::Begin { credentials, reply })
            .await
            .map_err(|_| anyhow!("failed to begin provisioning: provisioner stopped"))?;

        session
            .await
            .context("failed to begin provisioning: provisioner stopped")
    }

    /// Subscribe to snapshots, one per state mutation
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Snapshot {
        *self.snapshots.borrow()
    }

    /// Wait until `session` reaches a terminal phase
    ///
    /// Fails if the session gets superseded by a newer one or the loop stops.
    pub async fn wait_for_completion(&self, session: u64) -> Result<Snapshot> {
        let mut snapshots = self.snapshots.clone();

        let snapshot = *snapshots
            .wait_for(|s| s.session > session || (s.session == session && s.phase.is_terminal()))
            .await
            .context("failed to wait for session: provisioner stopped")?;

        ensure!(
            snapshot.session == session,
            "session {session} was superseded by session {}",
            snapshot.session
        );

        Ok(snapshot)
    }

    /// Begin provisioning and wait for the terminal snapshot
    pub async fn provision(&self, credentials: Credentials) -> Result<Snapshot> {
        let session = self.begin_provisioning(credentials).await?;
        self.wait_for_completion(session).await
    }

    /// Stop the event loop, dropping anything still in flight
    pub async fn shutdown(self) -> Result<()> {
        let Self { commands, task, .. } = self;
        drop(commands);
        task.await.context("failed to join provisioner task")
    }
}

struct InFlight {
    session: u64,
    attempt: BoxFuture<'static, AttemptOutcome>,
}

struct RetryDelay {
    session: u64,
    sleep: Pin<Box<Sleep>>,
}

struct Ticker {
    session: u64,
    interval: Interval,
}

impl Ticker {
    /// First tick fires one period after arming
    fn start(session: u64, period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { session, interval }
    }
}

/// The event loop: owns the model and every timer armed for it
struct Runtime<E> {
    executor: Arc<E>,
    timing: TimingConfig,
    model: Model,
    snapshots: watch::Sender<Snapshot>,
    attempt: Option<InFlight>,
    retry: Option<RetryDelay>,
    dots: Option<Ticker>,
    countdown: Option<Ticker>,
}

impl<E> Runtime<E>
where
    E: AttemptExecutor + Send + Sync + 'static,
{
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Begin { credentials, reply }) => {
                        self.dispatch(Event::BeginProvisioning(credentials));
                        let _ = reply.send(self.model.session);
                        continue;
                    }
                    None => break,
                },
                (session, outcome) = next_outcome(&mut self.attempt) => {
                    Event::AttemptCompleted { session, outcome }
                }
                session = next_retry(&mut self.retry) => Event::RetryDelayElapsed { session },
                session = next_tick(&mut self.dots) => Event::DotsTick { session },
                session = next_tick(&mut self.countdown) => Event::CountdownTick { session },
            };

            self.dispatch(event);
        }

        debug!("provisioner stopped");
    }

    fn dispatch(&mut self, event: Event) {
        let previous = self.model.phase;

        for effect in update(event, &mut self.model) {
            self.apply(effect);
        }

        if previous != self.model.phase {
            debug!(
                "session {}: {previous:?} -> {:?}",
                self.model.session, self.model.phase
            );
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Render => {
                self.snapshots.send_replace(self.model.snapshot());
            }
            Effect::Attempt {
                session,
                credentials,
            } => {
                debug_assert!(self.attempt.is_none(), "attempt already in flight");
                let executor = Arc::clone(&self.executor);
                let attempt = async move { executor.execute(&credentials).await }.boxed();
                self.attempt = Some(InFlight { session, attempt });
            }
            Effect::ScheduleRetry { session } => {
                self.retry = Some(RetryDelay {
                    session,
                    sleep: Box::pin(sleep(self.timing.retry_delay)),
                });
            }
            Effect::StartTickers { session } => {
                self.dots = Some(Ticker::start(session, self.timing.dots_interval));
                self.countdown = Some(Ticker::start(session, self.timing.countdown_interval));
            }
            Effect::StopTickers => {
                self.dots = None;
                self.countdown = None;
            }
            Effect::CancelSession => {
                if self.attempt.take().is_some() {
                    info!("cancelled in-flight setup request");
                }
                self.retry = None;
                self.dots = None;
                self.countdown = None;
            }
        }
    }
}

async fn next_outcome(slot: &mut Option<InFlight>) -> (u64, AttemptOutcome) {
    let Some(in_flight) = slot.as_mut() else {
        return pending().await;
    };

    let outcome = in_flight.attempt.as_mut().await;
    let session = in_flight.session;
    *slot = None;
    (session, outcome)
}

async fn next_retry(slot: &mut Option<RetryDelay>) -> u64 {
    let Some(delay) = slot.as_mut() else {
        return pending().await;
    };

    delay.sleep.as_mut().await;
    let session = delay.session;
    *slot = None;
    session
}

async fn next_tick(slot: &mut Option<Ticker>) -> u64 {
    let Some(ticker) = slot.as_mut() else {
        return pending().await;
    };

    ticker.interval.tick().await;
    ticker.session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{REQUEST_TIMEOUT, SessionPolicy},
        executor::execute_with_timeout,
        types::{Phase, ReentryPolicy},
    };
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    #[derive(Clone, Copy)]
    enum Step {
        Reply(Duration, AttemptOutcome),
        Unresponsive,
    }

    /// Executor replaying a scripted sequence of device behaviours
    #[derive(Default)]
    struct ScriptedExecutor {
        script: Mutex<VecDeque<Step>>,
        fallback: Option<Step>,
        calls: AtomicU32,
        in_flight: Arc<AtomicU32>,
        max_in_flight: AtomicU32,
    }

    struct InFlightGuard(Arc<AtomicU32>);

    impl Drop for InFlightGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn repeating(step: Step) -> Arc<Self> {
            Arc::new(Self {
                fallback: Some(step),
                ..Default::default()
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AttemptExecutor for ScriptedExecutor {
        async fn execute(&self, _credentials: &Credentials) -> AttemptOutcome {
            let step = self
                .script
                .lock()
                .expect("script lock poisoned")
                .pop_front()
                .or(self.fallback)
                .unwrap_or(Step::Unresponsive);

            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlightGuard(self.in_flight.clone());

            let request = async move {
                match step {
                    Step::Reply(delay, outcome) => {
                        sleep(delay).await;
                        Ok(outcome)
                    }
                    Step::Unresponsive => pending().await,
                }
            };

            execute_with_timeout(request, REQUEST_TIMEOUT).await
        }
    }

    fn lab_net() -> Credentials {
        Credentials::new("Lab-Net", "hunter2")
    }

    #[tokio::test(start_paused = true)]
    async fn success_within_timeout() {
        let executor = ScriptedExecutor::new(vec![Step::Reply(
            Duration::from_millis(500),
            AttemptOutcome::Success,
        )]);
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());
        let started = Instant::now();

        let snapshot = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        assert_eq!(snapshot.phase, Phase::Succeeded);
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(executor.calls(), 1);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_device_exhausts_retries() {
        let executor = ScriptedExecutor::repeating(Step::Unresponsive);
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());
        let started = Instant::now();

        let snapshot = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        // 4 timeouts plus 3 retry delays
        let elapsed = started.elapsed();
        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.retry_count, 3);
        assert_eq!(executor.calls(), 4);
        assert!(elapsed >= Duration::from_millis(14_000));
        assert!(elapsed < Duration::from_millis(14_100));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_fails_without_retry() {
        let executor = ScriptedExecutor::new(vec![Step::Reply(
            Duration::from_millis(100),
            AttemptOutcome::ApplicationFailure,
        )]);
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());
        let started = Instant::now();

        let snapshot = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(executor.calls(), 1);
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transport_errors() {
        let executor = ScriptedExecutor::new(vec![
            Step::Unresponsive,
            Step::Reply(Duration::from_millis(10), AttemptOutcome::TransportError),
            Step::Reply(Duration::from_millis(10), AttemptOutcome::Success),
        ]);
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());

        let snapshot = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        assert_eq!(snapshot.phase, Phase::Succeeded);
        assert_eq!(snapshot.retry_count, 2);
        assert_eq!(executor.calls(), 3);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tickers_follow_the_attempt() {
        let executor = ScriptedExecutor::repeating(Step::Unresponsive);
        let provisioner = Provisioner::spawn(executor, &ProvisionerConfig::default());
        let session = provisioner
            .begin_provisioning(lab_net())
            .await
            .expect("failed to begin provisioning");

        sleep(Duration::from_millis(1200)).await;
        let snapshot = provisioner.snapshot();
        assert_eq!(snapshot.session, session);
        assert_eq!(snapshot.phase, Phase::Connecting);
        assert_eq!(snapshot.countdown_seconds, 1);
        assert_eq!(snapshot.dots_phase, 2);

        // First timeout at 2s, retry delay until 4s, second attempt running
        sleep(Duration::from_millis(3100)).await;
        let snapshot = provisioner.snapshot();
        assert_eq!(snapshot.phase, Phase::Connecting);
        assert_eq!(snapshot.retry_count, 1);
        assert_eq!(snapshot.countdown_seconds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_supersedes_running_session() {
        let executor = ScriptedExecutor::repeating(Step::Reply(
            Duration::from_millis(500),
            AttemptOutcome::Success,
        ));
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());

        let first = provisioner
            .begin_provisioning(lab_net())
            .await
            .expect("failed to begin provisioning");
        let second = provisioner
            .begin_provisioning(Credentials::new("Other-Net", "secret99"))
            .await
            .expect("failed to begin provisioning");

        assert_eq!(second, first + 1);
        assert!(provisioner.wait_for_completion(first).await.is_err());

        let snapshot = provisioner
            .wait_for_completion(second)
            .await
            .expect("failed to wait for session");
        assert_eq!(snapshot.phase, Phase::Succeeded);
        assert_eq!(snapshot.retry_count, 0);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);

        // Nothing armed for either session mutates the finished state
        sleep(Duration::from_secs(5)).await;
        assert_eq!(provisioner.snapshot(), snapshot);
        assert_eq!(executor.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ignore_policy_keeps_running_session() {
        let executor = ScriptedExecutor::repeating(Step::Reply(
            Duration::from_millis(500),
            AttemptOutcome::Success,
        ));
        let config = ProvisionerConfig {
            session: SessionPolicy {
                reentry: ReentryPolicy::Ignore,
                ..Default::default()
            },
            ..Default::default()
        };
        let provisioner = Provisioner::spawn(executor.clone(), &config);

        let first = provisioner
            .begin_provisioning(lab_net())
            .await
            .expect("failed to begin provisioning");
        let second = provisioner
            .begin_provisioning(lab_net())
            .await
            .expect("failed to begin provisioning");

        assert_eq!(first, second);
        let snapshot = provisioner
            .wait_for_completion(first)
            .await
            .expect("failed to wait for session");
        assert_eq!(snapshot.phase, Phase::Succeeded);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_after_completion() {
        let executor = ScriptedExecutor::new(vec![
            Step::Reply(Duration::from_millis(100), AttemptOutcome::ApplicationFailure),
            Step::Reply(Duration::from_millis(100), AttemptOutcome::Success),
        ]);
        let provisioner = Provisioner::spawn(executor.clone(), &ProvisionerConfig::default());

        let failed = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");
        let succeeded = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        assert_eq!(failed.phase, Phase::Failed);
        assert_eq!(succeeded.phase, Phase::Succeeded);
        assert_eq!(succeeded.session, failed.session + 1);
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let executor = ScriptedExecutor::repeating(Step::Unresponsive);
        let provisioner = Provisioner::spawn(executor, &ProvisionerConfig::default());
        let mut snapshots = provisioner.subscribe();

        provisioner.shutdown().await.expect("failed to shut down");

        assert!(snapshots.changed().await.is_err());
    }

    #[cfg(feature = "mock")]
    #[tokio::test(start_paused = true)]
    async fn mocked_executor_is_invoked_once_per_attempt() {
        use crate::executor::MockAttemptExecutor;

        let mut executor = MockAttemptExecutor::new();
        executor
            .expect_execute()
            .times(2)
            .returning(|_| Box::pin(async { AttemptOutcome::TransportError }));
        let config = ProvisionerConfig {
            session: SessionPolicy {
                max_retries: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let provisioner = Provisioner::spawn(Arc::new(executor), &config);

        let snapshot = provisioner
            .provision(lab_net())
            .await
            .expect("failed to provision");

        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.retry_count, 1);
    }
}
