//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command, ValueHint};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "A statsd-compatible metrics aggregation daemon with dimensions.";

/// Flags overriding the configuration, accepted by `run` and the bare command.
fn override_args() -> Vec<Arg> {
    vec![
        Arg::new("address")
            .long("address")
            .value_name("ADDR")
            .env("STATSQ_ADDRESS")
            .help("The UDP address to listen on, such as `:8125`."),
        Arg::new("tcp_address")
            .long("tcp-address")
            .value_name("ADDR")
            .env("STATSQ_TCP_ADDRESS")
            .help("The TCP address to listen on. Disabled by default."),
        Arg::new("max_udp_packet_size")
            .long("max-udp-packet-size")
            .value_name("BYTES")
            .env("STATSQ_MAX_UDP_PACKET_SIZE")
            .help("The maximum size of a datagram or line."),
        Arg::new("graphite")
            .long("graphite")
            .value_name("ADDR")
            .env("STATSQ_GRAPHITE")
            .help("The Graphite address, or `-` to disable sending."),
        Arg::new("flush_interval")
            .long("flush-interval")
            .value_name("SECONDS")
            .env("STATSQ_FLUSH_INTERVAL")
            .help("The interval between two flushes."),
        Arg::new("debug")
            .long("debug")
            .action(ArgAction::SetTrue)
            .env("STATSQ_DEBUG")
            .help("Log all metrics sent to Graphite."),
        Arg::new("resend_gauges")
            .long("resend-gauges")
            .action(ArgAction::SetTrue)
            .env("STATSQ_RESEND_GAUGES")
            .conflicts_with("delete_gauges")
            .help("Keep sending the last value of gauges without updates."),
        Arg::new("delete_gauges")
            .long("delete-gauges")
            .action(ArgAction::SetTrue)
            .env("STATSQ_DELETE_GAUGES")
            .help("Remove gauges without updates after they were sent once."),
        Arg::new("persist_count_keys")
            .long("persist-count-keys")
            .value_name("FLUSHES")
            .env("STATSQ_PERSIST_COUNT_KEYS")
            .help("The number of flushes to keep sending zero for inactive counters."),
        Arg::new("receive_counter")
            .long("receive-counter")
            .value_name("NAME")
            .env("STATSQ_RECEIVE_COUNTER")
            .help("The metric name for the number of received packets per interval."),
        Arg::new("prefix")
            .long("prefix")
            .value_name("PREFIX")
            .env("STATSQ_PREFIX")
            .help("A prefix for all bucket names."),
        Arg::new("postfix")
            .long("postfix")
            .value_name("POSTFIX")
            .env("STATSQ_POSTFIX")
            .help("A postfix for all bucket names."),
        Arg::new("percentiles")
            .long("percentiles")
            .value_name("LIST")
            .env("STATSQ_PERCENTILES")
            .help("Comma-separated timer percentiles. Negative values count from the bottom."),
        Arg::new("log_level")
            .long("log-level")
            .value_name("LEVEL")
            .env("STATSQ_LOG_LEVEL")
            .value_parser(["off", "error", "warn", "info", "debug", "trace"])
            .help("The log level for statsq."),
        Arg::new("log_format")
            .long("log-format")
            .value_name("FORMAT")
            .env("STATSQ_LOG_FORMAT")
            .value_parser(["auto", "pretty", "simplified", "json"])
            .help("The log output format."),
    ]
}

pub fn make_app() -> Command {
    Command::new("statsq")
        .disable_help_subcommand(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .after_help("Without a subcommand, statsq runs in the foreground like `statsq run`.")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_hint(ValueHint::FilePath)
                .value_parser(ValueParser::path_buf())
                .env("STATSQ_CONFIG")
                .help("The path to a YAML config file."),
        )
        .args(override_args())
        .subcommand(
            Command::new("run")
                .about("Run the daemon")
                .after_help(
                    "This runs statsq in the foreground until it is shut down. It binds to the \
                     configured addresses and flushes to Graphite in the configured interval.",
                )
                .args(override_args()),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the configuration")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the effective configuration")
                        .after_help(
                            "This dumps out the configuration after applying the config file \
                             and environment variables.",
                        )
                        .arg(
                            Arg::new("format")
                                .short('f')
                                .long("format")
                                .default_value("yaml")
                                .value_parser(["debug", "yaml"])
                                .help("The output format"),
                        ),
                ),
        )
}
