mod plugin;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::CONFIG_FILE;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Engine")
        .command("serve", "Restore jobs and start the scheduler and API")
        .print();

    GuideSection::new("Plugins")
        .command("plugin list", "Show registered plugins")
        .command(
            "plugin add <package> --interval <secs>",
            "Register a plugin package",
        )
        .print();

    GuideSection::new("Options")
        .text("--config <path>          Engine config (default: ./plugboard.toml)")
        .text("--host <addr>            API bind address (serve only)")
        .text("--port <port>            API port (serve only)")
        .text("--description <text>     Plugin description (plugin add only)")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("plugboard").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServeFlags {
    pub config: PathBuf,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub(crate) fn parse_config_flag(args: &[String], start: usize) -> PathBuf {
    let mut config = PathBuf::from(CONFIG_FILE);
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    config
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> ServeFlags {
    let mut host = None;
    let mut port = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    ServeFlags {
        config: parse_config_flag(args, start),
        host,
        port,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PluginAddArgs {
    pub package: String,
    pub interval: Option<u64>,
    pub description: Option<String>,
}

/// The package is the first argument that is neither a flag nor a flag's value.
pub(crate) fn parse_plugin_add_args(args: &[String], start: usize) -> PluginAddArgs {
    let mut package = String::new();
    let mut interval = None;
    let mut description = None;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    interval = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--description" | "-d" => {
                if i + 1 < args.len() {
                    description = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => i += 2,
            other => {
                if package.is_empty() && !other.starts_with('-') {
                    package = other.to_string();
                }
                i += 1;
            }
        }
    }
    PluginAddArgs {
        package,
        interval,
        description,
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => {
            let flags = parse_serve_flags(&args, 2);
            serve::run_serve(flags).await?;
        }
        "plugin" => {
            let sub_cmd = if args.len() > 2 { args[2].as_str() } else { "" };
            let config = parse_config_flag(&args, 3);
            match sub_cmd {
                "list" => plugin::list_plugins(&config).await?,
                "add" => {
                    let parsed = parse_plugin_add_args(&args, 3);
                    if parsed.package.is_empty() {
                        print_error(
                            "Error: a package reference is required, e.g. builtin:sample@v1",
                        );
                        return Ok(());
                    }
                    let Some(interval) = parsed.interval else {
                        print_error("Error: --interval <secs> is required.");
                        return Ok(());
                    };
                    plugin::add_plugin(
                        &config,
                        &parsed.package,
                        interval,
                        parsed.description.as_deref(),
                    )
                    .await?;
                }
                _ => {
                    print_error("Unknown or missing plugin command. Expected: list, add");
                    print_help();
                }
            }
        }
        "help" | "--help" | "-h" => print_help(),
        other => {
            print_error(&format!("Unknown command: {}", other));
            print_help();
        }
    }
    Ok(())
}
