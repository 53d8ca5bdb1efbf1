use anyhow::Result;
use statsq_config::Config;

/// Checks settings that would produce invalid output lines.
pub fn check_config(config: &Config) -> Result<()> {
    if let Some(name) = config.receive_counter()
        && name.contains(char::is_whitespace)
    {
        anyhow::bail!("the receive counter name {name:?} must not contain whitespace");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    match config.path() {
        Some(path) => statsq_log::info!("launching statsq with config {}", path.display()),
        None => statsq_log::info!("launching statsq without config file"),
    }

    statsq_log::info!("  udp address: {}", config.udp_addr());
    match config.tcp_addr() {
        Some(addr) => statsq_log::info!("  tcp address: {addr}"),
        None => statsq_log::info!("  tcp address: -"),
    }
    statsq_log::info!("  graphite: {}", config.graphite());
    statsq_log::info!("  flush interval: {}s", config.flush_interval().as_secs());
    statsq_log::info!("  percentiles: {}", config.percentiles());
    statsq_log::info!("  log level: {}", config.logging().level);
}
