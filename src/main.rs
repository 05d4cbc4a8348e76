use anyhow::{Context, Result};

use people_tables::{init_telemetry, run_tutorial, PeopleTablesConfig, WorkflowError};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    PeopleTablesConfig::load_env_file().context("Failed to load .env file")?;
    let config = PeopleTablesConfig::load()?;
    init_telemetry(&config.observability).context("Failed to initialize logging")?;

    let stdout = std::io::stdout();
    match run_tutorial(&config, stdout.lock()).await {
        Ok(()) => Ok(()),
        // Storage failures end the run with a message, not an error exit
        Err(WorkflowError::Storage(err)) => {
            println!("oops...{}", err.message());
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
