use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use clap::parser::ValueSource;
use statsq_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    match matches.subcommand() {
        Some(("config", config_matches)) => {
            // Only environment variables can be set for the top-level flags here.
            config.apply_override(extract_config_args(&[&matches]))?;
            manage_config(&config, config_matches)
        }
        Some(("run", run_matches)) => {
            config.apply_override(extract_config_args(&[run_matches, &matches]))?;
            run(config)
        }
        _ => {
            config.apply_override(extract_config_args(&[&matches]))?;
            run(config)
        }
    }
}

/// Returns the value of a boolean flag, if it was passed or set in the environment.
fn flag_override(matches: &ArgMatches, id: &str) -> Option<String> {
    match matches.value_source(id) {
        Some(ValueSource::CommandLine | ValueSource::EnvVariable) => {
            Some(matches.get_flag(id).to_string())
        }
        _ => None,
    }
}

/// Extracts config overrides from the flags of `run` and the bare command.
///
/// Flags are looked up in order, so the first match set takes precedence.
pub fn extract_config_args(matches: &[&ArgMatches]) -> OverridableConfig {
    let value = |id: &str| {
        matches
            .iter()
            .find_map(|matches| matches.get_one::<String>(id).cloned())
    };
    let flag = |id: &str| matches.iter().find_map(|matches| flag_override(matches, id));

    OverridableConfig {
        address: value("address"),
        tcp_address: value("tcp_address"),
        max_udp_packet_size: value("max_udp_packet_size"),
        graphite: value("graphite"),
        flush_interval: value("flush_interval"),
        debug: flag("debug"),
        resend_gauges: flag("resend_gauges"),
        delete_gauges: flag("delete_gauges"),
        persist_count_keys: value("persist_count_keys"),
        receive_counter: value("receive_counter"),
        prefix: value("prefix"),
        postfix: value("postfix"),
        percentiles: value("percentiles"),
        log_level: value("log_level"),
        log_format: value("log_format"),
    }
}

#[allow(clippy::print_stdout)]
pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if let Some(matches) = matches.subcommand_matches("show") {
        match matches.get_one::<String>("format").map(String::as_str) {
            Some("debug") => println!("{config:#?}"),
            _ => print!("{}", config.to_yaml_string()?),
        }
        Ok(())
    } else {
        anyhow::bail!("unknown config command")
    }
}

pub fn run(config: Config) -> Result<()> {
    statsq_log::init(&config.logging());
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;

    statsq_server::run(config)?;

    statsq_log::info!("statsq shutdown complete");
    Ok(())
}
