//! Service lifecycle commands: up, stop, status

use std::collections::BTreeMap;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};
use wpharness_common::PidFile;
use wpharness_services::{ServiceContext, ServiceKind};

use super::{build_service, display_path, parse_service, BoxedService};
use crate::config::HarnessConfig;
use crate::output::{self, Notice, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct UpArgs {
    /// Services to start (mysql, chromedriver, php); defaults to every enabled one
    #[arg(value_parser = parse_service)]
    pub services: Vec<ServiceKind>,
}

#[derive(Args)]
pub struct StopArgs {
    /// Service to stop (mysql, chromedriver, php)
    #[arg(value_parser = parse_service)]
    pub service: ServiceKind,
}

/// One row of `wpharness status`/`wpharness up`
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub service: ServiceKind,
    pub pid_file: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub port: Option<u16>,
}

impl ServiceStatus {
    fn of(service: &BoxedService, ctx: &ServiceContext) -> Self {
        let pid = service.pid();
        Self {
            service: service.kind(),
            pid_file: display_path(&service.pid_file()),
            pid,
            alive: pid.is_some_and(|pid| ctx.runner().pid_alive(pid)),
            port: Some(service.port()),
        }
    }
}

impl TableDisplay for ServiceStatus {
    fn headers() -> Vec<&'static str> {
        vec!["Service", "PID File", "PID", "Alive", "Port"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.service.to_string(),
            self.pid_file.clone(),
            self.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            if self.alive {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            },
            self.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        ]
    }
}

struct Started {
    service: BoxedService,
    /// Adopted from an existing PID file; left running on shutdown.
    adopted: bool,
}

/// Start services, hold them until Ctrl-C, then stop them in reverse order
pub async fn up(
    args: UpArgs,
    config: &HarnessConfig,
    ctx: &ServiceContext,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let kinds = if args.services.is_empty() {
        config.enabled_services()
    } else {
        args.services
    };
    if kinds.is_empty() {
        output::notice(Notice::Warn, "No services enabled in the configuration");
        return Ok(());
    }

    let mut started: Vec<Started> = Vec::new();
    for kind in kinds {
        match start_one(kind, config, ctx).await {
            Ok(entry) => started.push(entry),
            Err(e) => {
                output::notice(Notice::Failed, format!("{} failed to start: {:#}", kind, e));
                shutdown(started).await;
                return Err(e);
            }
        }
    }

    let rows: Vec<ServiceStatus> = started
        .iter()
        .map(|entry| ServiceStatus::of(&entry.service, ctx))
        .collect();
    output::print_list(&rows, format, "No services started");
    output::notice(Notice::Note, "Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    shutdown(started).await;
    Ok(())
}

async fn start_one(
    kind: ServiceKind,
    config: &HarnessConfig,
    ctx: &ServiceContext,
) -> anyhow::Result<Started> {
    let adopted = PidFile::new(kind.pid_file(ctx.output_dir())).exists();
    let mut service = build_service(kind, config, ctx)?;

    let service = tokio::task::spawn_blocking(move || {
        service.start(&BTreeMap::new()).map(|()| service)
    })
    .await??;

    if adopted {
        output::notice(Notice::Note, format!("{} already running, attached", kind));
    } else {
        output::notice(Notice::Done, format!("{} started", kind));
    }
    Ok(Started { service, adopted })
}

async fn shutdown(started: Vec<Started>) {
    for entry in started.into_iter().rev() {
        let kind = entry.service.kind();
        if entry.adopted {
            info!("Leaving {} running; it was started elsewhere", kind);
            continue;
        }

        let mut service = entry.service;
        let result = tokio::task::spawn_blocking(move || service.stop()).await;
        match result {
            Ok(Ok(exit)) => output::stopped(kind, exit),
            Ok(Err(e)) => {
                output::notice(Notice::Failed, format!("{} did not stop cleanly: {}", kind, e))
            }
            Err(e) => warn!("Stop task for {} panicked: {}", kind, e),
        }
    }
}

/// Stop an instance recorded in the kind's PID file
pub fn stop(args: StopArgs, config: &HarnessConfig, ctx: &ServiceContext) -> anyhow::Result<()> {
    let mut service = build_service(args.service, config, ctx)?;

    if !service.attach_existing()? {
        output::notice(
            Notice::Warn,
            format!(
                "{} is not running (no {})",
                args.service,
                display_path(&service.pid_file())
            ),
        );
        return Ok(());
    }

    let exit = service
        .stop()
        .with_context(|| format!("failed to stop {}", args.service))?;
    output::stopped(args.service, exit);
    Ok(())
}

/// Report the PID file state of every service kind
pub fn status(ctx: &ServiceContext, format: OutputFormat) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for kind in ServiceKind::ALL {
        let pid_file = PidFile::new(kind.pid_file(ctx.output_dir()));
        let pid = pid_file.read()?;
        rows.push(ServiceStatus {
            service: kind,
            pid_file: display_path(pid_file.path()),
            pid,
            alive: pid.is_some_and(|pid| ctx.runner().pid_alive(pid)),
            port: None,
        });
    }

    output::print_list(&rows, format, "No service kinds known");
    Ok(())
}
