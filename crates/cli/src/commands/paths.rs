//! MySQL path derivation for any platform

use clap::Args;
use serde::Serialize;
use wpharness_common::{Architecture, MachineInformation, OperatingSystem};
use wpharness_services::mysql::{Distribution, MysqlLayout};
use wpharness_services::ServiceContext;

use super::display_path;
use crate::config::HarnessConfig;
use crate::output::{self, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct PathsArgs {
    /// Operating system to derive paths for (windows, linux, darwin); defaults to the host
    #[arg(long)]
    pub os: Option<String>,

    /// Architecture to derive paths for (x86_64, arm64); defaults to the host
    #[arg(long)]
    pub arch: Option<String>,

    /// Render with forward slashes regardless of the target platform
    #[arg(long)]
    pub normalize: bool,
}

#[derive(Debug, Serialize)]
pub struct PathEntry {
    pub name: &'static str,
    pub value: String,
}

impl TableDisplay for PathEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Name", "Value"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.to_string(), self.value.clone()]
    }
}

pub fn paths(
    args: PathsArgs,
    config: &HarnessConfig,
    ctx: &ServiceContext,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let host = ctx.machine();
    let machine = MachineInformation::new(
        args.os
            .as_deref()
            .map(OperatingSystem::parse)
            .unwrap_or(host.os()),
        args.arch
            .as_deref()
            .map(Architecture::parse)
            .unwrap_or(host.arch()),
    );

    let directory = config
        .mysql
        .directory
        .clone()
        .unwrap_or_else(|| ctx.output_dir().join("_mysql_server"));
    let layout = match (&config.mysql.binary, &config.mysql.share_dir) {
        (Some(binary), Some(share_dir)) => MysqlLayout::new(
            directory,
            machine,
            Distribution::Custom {
                binary: binary.clone(),
                share_dir: share_dir.clone(),
            },
        ),
        _ => MysqlLayout::bundled(directory, machine)?,
    };

    let entries = derive(&layout, args.normalize);
    output::print_list(&entries, format, "No paths derived");
    Ok(())
}

fn derive(layout: &MysqlLayout, normalize: bool) -> Vec<PathEntry> {
    let or_custom = |result: wpharness_common::Result<String>| {
        result.unwrap_or_else(|_| "(custom binary)".to_string())
    };

    vec![
        PathEntry {
            name: "archive_url",
            value: or_custom(layout.archive_url()),
        },
        PathEntry {
            name: "archive_path",
            value: or_custom(layout.archive_path(normalize).map(|p| display_path(&p))),
        },
        PathEntry {
            name: "extracted_path",
            value: or_custom(layout.extracted_path(normalize).map(|p| display_path(&p))),
        },
        PathEntry {
            name: "binary_path",
            value: display_path(&layout.binary_path(normalize)),
        },
        PathEntry {
            name: "share_dir",
            value: display_path(&layout.share_dir(normalize)),
        },
        PathEntry {
            name: "data_dir",
            value: display_path(&layout.data_dir(normalize)),
        },
        PathEntry {
            name: "socket_path",
            value: display_path(&layout.socket_path(normalize)),
        },
        PathEntry {
            name: "pid_file_path",
            value: display_path(&layout.pid_file_path(normalize)),
        },
        PathEntry {
            name: "error_log_path",
            value: display_path(&layout.error_log_path(normalize)),
        },
    ]
}
