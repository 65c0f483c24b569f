use anyhow::Context;
use anyhow::Result;
use api_types::InplaceUpdate;
use clap::Parser;
use inplace_update::app::ApplicationBuilder;
use inplace_update::config::Cli;
use inplace_update::config::Commands;
use inplace_update::config::ControllerArgs;
use kube::CustomResourceExt;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Controller(args) => run_controller(*args).await,
        Commands::Crd => print_crd(),
    }
}

async fn run_controller(args: ControllerArgs) -> Result<()> {
    let _guard = logging::init();

    tracing::info!("Starting inplace-update controller {}", &**version::VERSION);

    let app = ApplicationBuilder::new(args).build().await?;
    app.run().await?;

    Ok(())
}

fn print_crd() -> Result<()> {
    let manifest =
        serde_yaml::to_string(&InplaceUpdate::crd()).context("Failed to render CRD manifest")?;
    print!("{manifest}");
    Ok(())
}
