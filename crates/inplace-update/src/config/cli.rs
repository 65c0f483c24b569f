use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::controller::ControllerArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the in-place update controller
    Controller(Box<ControllerArgs>),
    /// Print the InplaceUpdate CustomResourceDefinition as YAML
    Crd,
}
