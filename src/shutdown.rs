//! Ordered, failure-isolated teardown.
//!
//! Steps run one after another, each under its own timeout. A failing or
//! hanging step is logged and the next one still runs. The sequence executes
//! at most once per process; every caller of [`ShutdownCoordinator::shutdown`]
//! waits for that single run and gets the same report.

use crate::Result;
use crate::error::ShutdownError;
use crate::gui::GuiShell;
use crate::managed_process::Role;
use crate::procs::ProcessTreeTerminator;
use crate::supervisor::ProcessSupervisor;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

type StepFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type StepAction = Box<dyn Fn() -> StepFuture + Send + Sync>;

pub struct ShutdownStep {
    pub name: String,
    pub is_fatal: bool,
    action: StepAction,
}

impl ShutdownStep {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            is_fatal: false,
            action: Box::new(move || Box::pin(action())),
        }
    }

    /// A failure of this step makes the whole shutdown count as failed.
    pub fn fatal(mut self) -> Self {
        self.is_fatal = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: String,
    pub is_fatal: bool,
    /// `None` on success
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl StepOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    pub fn has_fatal_failure(&self) -> bool {
        self.steps.iter().any(|s| s.is_fatal && !s.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.is_ok())
    }
}

pub struct ShutdownCoordinator {
    steps: Vec<ShutdownStep>,
    step_timeout: Duration,
    started: AtomicBool,
    report: OnceCell<Arc<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(steps: Vec<ShutdownStep>, step_timeout: Duration) -> Self {
        Self {
            steps,
            step_timeout,
            started: AtomicBool::new(false),
            report: OnceCell::new(),
        }
    }

    /// The standard teardown of the GUI, the daemon and the frontend.
    pub fn for_supervisor(supervisor: Arc<ProcessSupervisor>, gui: Arc<dyn GuiShell>) -> Self {
        let step_timeout = supervisor.settings().shutdown_step_timeout();
        let grace = supervisor.settings().shutdown_exit_grace();
        let terminator = supervisor.terminator().clone();
        let mut steps = vec![];

        // startup still in flight must not spawn anything past this point
        let sup = supervisor.clone();
        steps.push(ShutdownStep::new("refuse-new-spawns", move || {
            let sup = sup.clone();
            async move {
                sup.begin_shutdown().await;
                Ok(())
            }
        }));

        steps.push(ShutdownStep::new("teardown-gui", move || {
            let gui = gui.clone();
            async move { gui.teardown() }
        }));

        let sup = supervisor.clone();
        steps.push(ShutdownStep::new("stop-daemon-services", move || {
            let sup = sup.clone();
            async move {
                let Some(daemon) = sup.process(Role::Daemon).await else {
                    debug!("no daemon running");
                    return Ok(());
                };
                let stop_path = &sup.settings().daemon.stop_path;
                sup.client().stop_all_services(daemon.port, stop_path).await
            }
        }));

        steps.extend(tree_steps(
            &supervisor,
            &terminator,
            Role::Daemon,
            "kill-daemon-tree",
            "terminate-daemon",
            grace,
        ));
        steps.extend(tree_steps(
            &supervisor,
            &terminator,
            Role::Frontend,
            "kill-frontend-tree",
            "terminate-frontend",
            grace,
        ));

        let sup = supervisor.clone();
        steps.push(ShutdownStep::new("close-embedded-frontend", move || {
            let sup = sup.clone();
            async move {
                if let Some(frontend) = sup.take_embedded_frontend().await {
                    frontend.close().await;
                }
                Ok(())
            }
        }));

        let sup = supervisor;
        steps.push(ShutdownStep::new("clear-session", move || {
            let sup = sup.clone();
            async move { sup.clear_session().await }
        }));

        Self::new(steps, step_timeout)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the steps once. Concurrent and later callers get the same report.
    pub async fn shutdown(&self) -> Arc<ShutdownReport> {
        self.report
            .get_or_init(|| async {
                self.started.store(true, Ordering::SeqCst);
                Arc::new(self.run_steps().await)
            })
            .await
            .clone()
    }

    async fn run_steps(&self) -> ShutdownReport {
        info!("shutting down");
        let mut report = ShutdownReport::default();
        for step in &self.steps {
            let start = Instant::now();
            // spawned so a panicking step fails alone
            let mut task = tokio::spawn((step.action)());
            let result = match tokio::time::timeout(self.step_timeout, &mut task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(miette::miette!("step panicked: {e}")),
                Err(_) => {
                    task.abort();
                    Err(ShutdownError::StepTimeout {
                        step: step.name.clone(),
                        timeout: self.step_timeout,
                    }
                    .into())
                }
            };
            let elapsed = start.elapsed();
            let error = match result {
                Ok(()) => {
                    debug!("shutdown step {} done in {elapsed:?}", step.name);
                    None
                }
                Err(e) => {
                    if step.is_fatal {
                        error!("shutdown step {} failed: {e}", step.name);
                    } else {
                        warn!("shutdown step {} failed: {e}", step.name);
                    }
                    Some(e.to_string())
                }
            };
            report.steps.push(StepOutcome {
                name: step.name.clone(),
                is_fatal: step.is_fatal,
                error,
                elapsed,
            });
        }
        info!("shutdown complete");
        report
    }
}

/// Tree kill first so helpers spawned by the process go too, then a direct
/// terminate on the handle to reap it.
fn tree_steps(
    supervisor: &Arc<ProcessSupervisor>,
    terminator: &ProcessTreeTerminator,
    role: Role,
    kill_tree_name: &str,
    terminate_name: &str,
    grace: Duration,
) -> [ShutdownStep; 2] {
    let sup = supervisor.clone();
    let term = terminator.clone();
    let kill_tree = ShutdownStep::new(kill_tree_name, move || {
        let sup = sup.clone();
        let term = term.clone();
        async move {
            let Some(process) = sup.process(role).await else {
                return Ok(());
            };
            term.terminate_tree_async(process.pid).await?;
            Ok(())
        }
    });

    let sup = supervisor.clone();
    let terminate = ShutdownStep::new(terminate_name, move || {
        let sup = sup.clone();
        async move {
            let Some(process) = sup.process(role).await else {
                return Ok(());
            };
            process
                .terminate(grace)
                .await
                .map_err(|e| miette::miette!("failed to terminate {process}: {e}"))?;
            sup.forget(role).await;
            Ok(())
        }
    })
    .fatal();

    [kill_tree, terminate]
}
