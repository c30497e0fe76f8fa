use anyhow::Result;
use camnode::{CameraNode, CamnodeConfig, GrabRequest};
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "camnode")]
#[command(about = "Camera control node with extended-range brightness control")]
#[command(version)]
#[command(long_about = "Serialises access to a single camera, exposes exposure, gain, gamma \
and target-brightness control, streams frames to subscribers and runs cancellable \
multi-image acquisitions. Runs against a simulated device configured in the [simulation] section.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camnode.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the node")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Reach a target brightness once, print the result and exit
    #[arg(long, value_name = "TARGET", help = "Set brightness to TARGET (1-255), print the result as JSON and exit")]
    brightness: Option<i32>,

    /// Run one acquisition, print a summary and exit
    #[arg(long, value_name = "COUNT", help = "Acquire COUNT images, print a JSON summary and exit")]
    grab: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting camnode v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CamnodeConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match config.validate() {
        Ok(()) if args.validate_config => {
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => info!("Configuration loaded and validated"),
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let (node, _handle) = CameraNode::simulated(config).map_err(|e| {
        error!("Failed to create camera node: {}", e);
        e
    })?;

    if args.brightness.is_some() || args.grab.is_some() {
        node.start().await?;
        let outcome = run_once(&node, &args).await;
        let exit_code = node.shutdown().await;
        outcome?;
        std::process::exit(exit_code);
    }

    let exit_code = node.run().await.map_err(|e| {
        error!("Node error during execution: {}", e);
        e
    })?;

    info!("camnode exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

async fn run_once(node: &CameraNode, args: &Args) -> Result<()> {
    if let Some(target) = args.brightness {
        let config = &node.config().startup;
        let response = node
            .set_brightness(target, config.exposure_auto, config.gain_auto)
            .await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    if let Some(count) = args.grab {
        let mut goal = node.grab_images(GrabRequest::new(count))?;
        while let Some(feedback) = goal.next_feedback().await {
            info!(
                "Image {}/{} captured (brightness {:.1})",
                feedback.images_completed, count, feedback.reached.brightness
            );
        }
        let result = goal.result().await?;
        let summary = json!({
            "goal_id": result.goal_id,
            "outcome": result.outcome,
            "success_count": result.success_count,
            "reached_all_requested": result.reached_all_requested,
            "reached": result.reached,
            "error": result.error.as_ref().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camnode={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# camnode configuration file");
    println!("# Every value below is the built-in default. Environment variables");
    println!("# override it, e.g. CAMNODE__CAMERA__FRAME_RATE=10");
    println!();
    println!("{}", toml::to_string_pretty(&CamnodeConfig::default())?);
    Ok(())
}
