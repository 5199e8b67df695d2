//! gpu-picker: find and claim an idle GPU on a shared host.

use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use gpu_picker::config::{Cli, Command, Config};
use gpu_picker::gpu::{
    device_statuses, init_device, CancelToken, DeviceQuerier, DeviceSelector, FreeDeviceSelector,
    SelectError,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing/logging. Logs go to stderr so stdout stays scriptable.
    let filter = if cli.verbose {
        "gpu_picker=debug"
    } else {
        "gpu_picker=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = Config::load(&cli.config)?;
    let cancel = CancelToken::new();

    // Device queries block; run them off the runtime so Ctrl-C can stop a wait.
    let worker = {
        let cancel = cancel.clone();
        let command = cli.command.clone();
        tokio::task::spawn_blocking(move || run(command, &config, cancel))
    };
    tokio::pin!(worker);

    tokio::select! {
        result = &mut worker => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling");
            cancel.cancel();
            worker.await?
        }
    }
}

fn run(command: Command, config: &Config, cancel: CancelToken) -> anyhow::Result<ExitCode> {
    let querier = config.querier();

    match command {
        Command::Count => {
            println!("{}", querier.count_devices()?);
        }
        Command::Status { json } => {
            let statuses = device_statuses(&querier)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                for status in &statuses {
                    let state = if status.free { "free" } else { "busy" };
                    println!("{}{}\t{state}", config.device.prefix, status.index);
                }
            }
        }
        Command::Select {
            wait,
            count,
            prefix,
        } => {
            let wait = wait.unwrap_or(config.device.wait_secs);
            let prefix = prefix.unwrap_or_else(|| config.device.prefix.clone());
            let policy = config.retry_policy(wait).with_cancel(cancel);
            let selector = FreeDeviceSelector::new(&querier, policy, prefix);

            match selector.select(count.or(config.device.device_count)) {
                Ok(Some(handle)) => println!("{handle}"),
                Ok(None) => {
                    info!("No free GPU");
                    return Ok(ExitCode::from(2));
                }
                Err(SelectError::Cancelled) => return Ok(ExitCode::from(130)),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Init { gpu, prefix } => {
            let raw = gpu.or_else(|| config.device.selector.clone());
            let selector = DeviceSelector::from(raw.as_deref());
            let prefix = prefix.unwrap_or_else(|| config.device.prefix.clone());

            #[cfg(feature = "cuda")]
            let backend = gpu_picker::gpu::CudaBackend::new(prefix.as_str());
            #[cfg(not(feature = "cuda"))]
            let backend = gpu_picker::gpu::ProbeBackend::new(&querier, prefix.as_str());

            let outcome = init_device(selector, &prefix, &querier, backend)?;
            println!("{outcome}");
        }
    }

    Ok(ExitCode::SUCCESS)
}
