use fleetsyncd::daemon::{DaemonConfig, DaemonRuntime};
use fleetsyncd::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Serve,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Serve;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: fleetsyncd [--once]");
        println!("  --once   Run one full sync of every kind, print the reports and exit");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    logging::init(config.log_format);
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match mode {
        CliMode::Once => {
            let reports = daemon.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }
        _ => daemon.run().await,
    }
}
