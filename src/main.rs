use speedtest_manager::{cli, logger, server, settings};

/**
 * Start our managers
 */
fn let_there_be_light() {
    // CLI should be started before logger to allow control over verbosity
    cli::manager::init();
    // Logger should start before everything else to register any log information
    logger::manager::init();
    settings::manager::init(cli::manager::settings_file().as_deref());
}

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    let_there_be_light();

    server::manager::run(&cli::manager::server_address()).await
}
