use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "WATCH_NAMESPACE",
        help = "Namespace to watch for InplaceUpdate requests (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds before revisiting a request that waits on its target or has pods left"
    )]
    pub requeue_after_secs: u64,

    #[arg(
        long,
        default_value = "3",
        help = "Total submission attempts per pod before it is counted as failed"
    )]
    pub pod_retry_limit: u32,

    #[arg(
        long,
        default_value = "5",
        help = "Fixed seconds to wait between two submission attempts on the same pod"
    )]
    pub pod_retry_delay_secs: u64,

    #[arg(
        long,
        env = "UPDATE_WORKERS",
        default_value = "16",
        help = "Maximum number of pods submitted concurrently within one pass"
    )]
    pub update_workers: usize,

    #[arg(
        long,
        default_value = "4",
        help = "Total status write attempts when the request keeps changing underneath"
    )]
    pub status_retry_steps: u32,

    #[arg(
        long,
        default_value = "10",
        help = "Milliseconds to wait before the first status write retry"
    )]
    pub status_retry_initial_ms: u64,

    #[arg(
        long,
        default_value = "5.0",
        help = "Multiplier applied to the status retry wait after each conflict"
    )]
    pub status_retry_factor: f64,
}
