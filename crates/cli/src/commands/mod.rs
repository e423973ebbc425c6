//! CLI command implementations

pub mod paths;
pub mod service;

use std::path::Path;

use anyhow::Context;
use wpharness_services::{
    ChromeDriver, ManagedProcess, MysqlServer, PhpBuiltInServer, ServiceContext, ServiceKind,
};

use crate::config::HarnessConfig;

/// A service instance the CLI can move between threads
pub type BoxedService = Box<dyn ManagedProcess + Send>;

/// Build the service of `kind` from its config section
pub fn build_service(
    kind: ServiceKind,
    config: &HarnessConfig,
    ctx: &ServiceContext,
) -> anyhow::Result<BoxedService> {
    let service: BoxedService = match kind {
        ServiceKind::MysqlServer => Box::new(
            MysqlServer::new(ctx.clone(), config.mysql.to_options())
                .context("invalid [mysql] configuration")?,
        ),
        ServiceKind::ChromeDriver => Box::new(ChromeDriver::new(
            ctx.clone(),
            config.chromedriver.to_options(),
        )),
        ServiceKind::PhpBuiltInServer => Box::new(
            PhpBuiltInServer::new(
                ctx.clone(),
                &config.php.document_root,
                config.php.to_options(),
            )
            .context("invalid [php] configuration")?,
        ),
    };
    Ok(service)
}

/// Parse a service name for clap
pub fn parse_service(name: &str) -> Result<ServiceKind, String> {
    name.parse::<ServiceKind>().map_err(|e| e.to_string())
}

pub(crate) fn display_path(path: &Path) -> String {
    path.display().to_string()
}
