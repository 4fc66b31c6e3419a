mod cmd;
mod config;
mod util;

use clap::Parser;
use cmd::GlobalArgs;
use pjudge_core::testing::CancelToken;

#[tokio::main]
async fn main() {
    let app = GlobalArgs::parse();
    util::init_logger(app.log_level());

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; stopping running programs");
                cancel.cancel();
            }
        });
    }

    let passed = app.exec_subcmd(&cancel).await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    });
    if !passed || cancel.is_cancelled() {
        std::process::exit(1);
    }
}
