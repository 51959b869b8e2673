use std::sync::Arc;
use clap::Parser;
use roahist::config::{Config, Options};
use roahist::daemon::start::{build_manager, start_daemon};

#[tokio::main]
async fn main() {
    let options = Options::parse();
    let config = match Config::create(&options) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("{err}");
            ::std::process::exit(1);
        }
    };

    if options.once {
        let manager = match build_manager(&config) {
            Ok(manager) => manager,
            Err(err) => {
                eprintln!("roahist failed to start: {err}");
                ::std::process::exit(1);
            }
        };
        let status = manager.trigger().await;
        match serde_json::to_string_pretty(&status) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("Cannot serialize status: {err}"),
        }
        if status.is_error() {
            ::std::process::exit(1);
        }
        return
    }

    if let Err(err) = start_daemon(config, None).await {
        eprintln!("roahist failed to start: {err}");
        ::std::process::exit(1);
    }
}
