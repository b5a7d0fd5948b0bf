use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use fairshare::{
    auth::Authenticator,
    config::{Config, LogConfig},
    ledger::{Ledger, Stores},
    routes,
};
use mongodb::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match Config::load_with_dotenv() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.log);

    info!(database = %config.database.name, "connecting to store");
    let client = Client::with_uri_str(&config.database.uri)
        .await
        .map_err(std::io::Error::other)?;
    let stores = Stores::mongo(&client.database(&config.database.name))
        .await
        .map_err(|err| {
            error!(error = %err, "failed to prepare collections");
            std::io::Error::other(err)
        })?;
    info!("Connected");

    let ledger = web::Data::new(Ledger::new(stores, config.split, config.retry.policy()));
    let authenticator = web::Data::new(Authenticator::new(&config.auth));

    let (host, port) = config.bind_address();
    info!(%host, port, "starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(ledger.clone())
            .app_data(authenticator.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((host, port))?
    .run()
    .await
}
