//! # HTTP Engine - Entry Point
//! src/main.rs
//!
//! Arranca un contexto a partir de la línea de comandos y lo detiene al
//! recibir EOF o una línea `quit` por stdin.

use clap::Parser;
use http_engine::config::CliArgs;
use http_engine::{Callbacks, Server};
use std::io::{self, BufRead};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let options = match args.into_options() {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let callbacks = Callbacks::new()
        .with_init_context(|ctx| info!("context {} initialized", ctx.id()))
        .with_exit_context(|ctx| info!("final stats: {}", ctx.stats().to_json()));

    let mut ctx = match Server::builder().callbacks(callbacks).start(&options) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error fatal: {}", e);
            std::process::exit(1);
        }
    };

    info!("listening on {:?}, type 'quit' or close stdin to stop", ctx.ports());

    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => break,
            Ok(line) if line.trim() == "stats" => println!("{}", ctx.stats().to_json()),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    ctx.stop();
}
