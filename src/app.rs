//! Full supervised lifecycle of one application run.

use crate::Result;
use crate::crash::{CrashHandler, ExitSender, ExitTrigger};
use crate::error::StartupError;
use crate::gui::GuiShell;
use crate::instance::InstanceGuard;
use crate::logger;
use crate::ipc::{InstanceRequest, InstanceResponse, InstanceServer};
use crate::procs::ProcessTreeTerminator;
use crate::settings::Settings;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::ProcessSupervisor;
use std::sync::Arc;

/// Run until an exit trigger fires and return the process exit code.
///
/// Returns 0 right away when another instance already holds the lock; that
/// instance is asked to focus its window first.
pub async fn run(settings: Arc<Settings>, gui: Arc<dyn GuiShell>) -> Result<i32> {
    let log_file = settings.log_file();
    if let Err(e) = logger::set_log_file(&log_file) {
        warn!("could not open log file {}: {e}", log_file.display());
    }
    let guard = InstanceGuard::new(&settings.state_dir(), &settings.app.id);
    if !guard.acquire()? {
        if let Err(e) = guard.notify_existing().await {
            warn!("could not reach the running instance: {e}");
        }
        return Ok(0);
    }

    let supervisor = Arc::new(ProcessSupervisor::new(
        settings.clone(),
        ProcessTreeTerminator::platform(),
    ));
    let coordinator = Arc::new(ShutdownCoordinator::for_supervisor(
        supervisor.clone(),
        gui.clone(),
    ));
    let crash = CrashHandler::new(coordinator);
    crash.install()?;

    let server = InstanceServer::new(guard.socket_path())?;
    let listener = tokio::spawn(serve_instance_channel(server, gui.clone(), crash.sender()));

    let exit = crash.sender();
    tokio::spawn(async move {
        match supervisor.start(gui.as_ref()).await {
            Ok(ports) => debug!("running with {ports:?}"),
            Err(StartupError::ShuttingDown { role }) => {
                debug!("startup of {role} abandoned for shutdown");
            }
            Err(e) => {
                error!("startup failed: {e}");
                gui.notify_fatal(&e.to_string());
                exit.trigger(ExitTrigger::Fault(e.to_string()));
            }
        }
    });

    let code = crash.wait().await;
    listener.abort();
    info!("exiting with code {code}");
    Ok(code)
}

async fn serve_instance_channel(mut server: InstanceServer, gui: Arc<dyn GuiShell>, exit: ExitSender) {
    loop {
        let (request, reply) = match server.read().await {
            Ok(msg) => msg,
            Err(e) => {
                debug!("instance channel stopped: {e}");
                return;
            }
        };
        debug!("instance request: {request}");
        match request {
            InstanceRequest::Ping => {}
            InstanceRequest::Focus => gui.focus_main_window(),
            InstanceRequest::Quit => exit.trigger(ExitTrigger::Quit),
        }
        if reply.send(InstanceResponse::Ok).await.is_err() {
            trace!("client went away before the reply");
        }
    }
}
