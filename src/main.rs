use elastic_backend::{
    api::{self, AppState},
    config::{BackendConfig, ServerConfig},
    logging, Result,
};
use tracing::error;

async fn run(config: &ServerConfig) -> Result<()> {
    let backend = BackendConfig::from_file(&config.config_path)?;
    let state = AppState::from_config(config, backend)?;
    api::serve(config, state).await
}

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    logging::init_logger(&config.log_level, config.log_format);

    if let Err(e) = run(&config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
