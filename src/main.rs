use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use persona_agent::server::{configure, cors};
use persona_agent::{AppConfig, PersonaAgent};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // A missing .env file is fine; the environment may already be set
    let dotenv = dotenvy::dotenv();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded environment from {}", path.display());
    }

    let config = AppConfig::from_env();
    let agent = PersonaAgent::from_config(&config).map_err(std::io::Error::other)?;

    let agent = web::Data::new(agent);
    let app_config = web::Data::new(config.clone());

    tracing::info!(
        "Starting server at http://{}:{}/ (Swagger UI at /swagger-ui/)",
        config.host,
        config.port
    );
    tracing::info!("Allowed origins: {}", config.allowed_origins.join(", "));

    let allowed_origins = config.allowed_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&allowed_origins))
            .wrap(Logger::default())
            .app_data(agent.clone())
            .app_data(app_config.clone())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
