mod assembler;
mod config;
mod error;
mod lifecycle;
mod registry;
mod services;
mod storage;

use crate::assembler::compiler::ProcessCompiler;
use crate::assembler::DocumentAssembler;
use crate::config::AppConfig;
use crate::lifecycle::LifecycleManager;
use crate::registry::FormSpecRegistry;
use crate::storage::attachments::AttachmentStore;
use crate::storage::ledger_store::LedgerStore;
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::info;
use std::io;
use std::sync::Arc;

fn startup_error(e: error::FormError) -> io::Error {
    io::Error::other(e.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = AppConfig::load().map_err(startup_error)?;
    config.ensure_directories().map_err(startup_error)?;

    let registry = FormSpecRegistry::load(&config.forms_spec).map_err(startup_error)?;
    info!(
        "loaded form types: {}",
        registry.formtypes().collect::<Vec<_>>().join(", ")
    );

    let ledger = Arc::new(LedgerStore::open(&config.ledger_location).map_err(startup_error)?);
    let attachments = Arc::new(
        AttachmentStore::open(&config.attachment_directory, ledger.clone())
            .map_err(startup_error)?,
    );
    let assembler = DocumentAssembler::new(
        ProcessCompiler::new(&config.compiler),
        attachments.clone(),
        &config.temp_dir_location,
        &config.built_pdf_location,
    );
    let manager = web::Data::new(LifecycleManager::new(
        registry,
        ledger,
        attachments,
        assembler,
        &config.prefix,
    ));

    let url = format!("http://{}:{}{}", config.host, config.port, config.prefix);
    info!("Server running at {}", url);

    let bind = (config.host.clone(), config.port);
    let app_config = web::Data::new(config);
    HttpServer::new(move || {
        App::new()
            .app_data(manager.clone())
            .app_data(app_config.clone())
            .service(services::forms::configure_routes::<ProcessCompiler>(
                &app_config.prefix,
            ))
    })
    .bind(bind)?
    .run()
    .await
}
