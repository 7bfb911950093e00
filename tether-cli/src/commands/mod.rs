use crate::cli::Commands;
use anyhow::Result;

pub mod demo;
pub mod nsid;
pub mod version;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Demo { namespaces, config } => {
            demo::execute(usize::from(namespaces), config.as_deref()).await
        }
        Commands::Nsid { config } => nsid::execute(config.as_deref()).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
