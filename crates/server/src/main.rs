use std::path::PathBuf;
use std::process;

use clap::Parser;

use motion_relay_server::config::{Model, Selection, ServerConfig, Sharing};
use motion_relay_server::server::Server;

/// Detects motion in a live WebSocket video stream and re-broadcasts the
/// annotated frames to every connected viewer.
#[derive(Parser, Debug, Default)]
#[command(name = "motion-relay")]
struct Cli {
    /// JSON config file (default: <config dir>/motion-relay/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,

    /// WebSocket endpoint path.
    #[arg(long)]
    path: Option<String>,

    /// Regions smaller than this many pixels are ignored.
    #[arg(long)]
    min_area: Option<f64>,

    /// Morphology structuring element size (must be odd).
    #[arg(long)]
    kernel_size: Option<usize>,

    /// Mask values above this count as foreground (0-255).
    #[arg(long)]
    threshold: Option<u8>,

    /// Run closing and opening on the mask before extracting regions.
    #[arg(long, value_name = "BOOL")]
    cleanup: Option<bool>,

    /// Which regions to outline.
    #[arg(long, value_enum)]
    selection: Option<Selection>,

    /// Background subtraction algorithm.
    #[arg(long, value_enum)]
    model: Option<Model>,

    /// Background learning rate (0.0-1.0); automatic when omitted.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Frames the automatic learning rate averages over.
    #[arg(long)]
    history: Option<usize>,

    /// Mark shadows separately so they are not reported as motion.
    #[arg(long, value_name = "BOOL")]
    detect_shadows: Option<bool>,

    /// Whether all connections feed one background model.
    #[arg(long, value_enum)]
    sharing: Option<Sharing>,

    /// Static image of the empty scene used to prime the model.
    #[arg(long)]
    reference_image: Option<PathBuf>,

    /// Times the reference image is applied before serving.
    #[arg(long)]
    warmup_iterations: Option<usize>,

    /// Learning rate used while priming.
    #[arg(long)]
    warmup_learning_rate: Option<f64>,

    /// Output JPEG quality (1-100).
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Frames buffered per viewer before frames are skipped.
    #[arg(long)]
    subscriber_queue: Option<usize>,

    /// Largest accepted inbound message in bytes.
    #[arg(long)]
    max_message_bytes: Option<usize>,

    /// How often idle connections flush outbound frames, in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Idle seconds before a viewer is pinged; 0 disables keep-alive.
    #[arg(long)]
    keep_alive_secs: Option<u64>,

    /// Write every raw foreground mask as a PNG into this directory.
    #[arg(long)]
    dump_masks: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    apply_overrides(cli, &mut config);
    config.validate()?;

    Server::bind(config)?.run()
}

fn apply_overrides(cli: Cli, config: &mut ServerConfig) {
    macro_rules! set {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = cli.$field {
                config.$field = value;
            })*
        };
    }
    set!(
        bind,
        path,
        min_area,
        kernel_size,
        threshold,
        cleanup,
        selection,
        model,
        history,
        detect_shadows,
        sharing,
        warmup_iterations,
        warmup_learning_rate,
        jpeg_quality,
        subscriber_queue,
        max_message_bytes,
        poll_interval_ms,
        keep_alive_secs,
    );
    if cli.learning_rate.is_some() {
        config.learning_rate = cli.learning_rate;
    }
    if cli.reference_image.is_some() {
        config.reference_image = cli.reference_image;
    }
    if cli.dump_masks.is_some() {
        config.dump_masks = cli.dump_masks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("motion-relay").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_flags_keep_file_values() {
        let mut config = ServerConfig {
            min_area: 900.0,
            ..ServerConfig::default()
        };
        apply_overrides(parse(&[]), &mut config);
        assert_eq!(config.min_area, 900.0);
        assert_eq!(config.learning_rate, None);
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut config = ServerConfig {
            min_area: 900.0,
            learning_rate: Some(0.2),
            ..ServerConfig::default()
        };
        let cli = parse(&[
            "--min-area",
            "250",
            "--selection",
            "largest-only",
            "--model",
            "knn",
            "--sharing",
            "per-session",
            "--cleanup",
            "false",
            "--learning-rate",
            "0.01",
            "--dump-masks",
            "/tmp/masks",
            "--keep-alive-secs",
            "0",
        ]);

        apply_overrides(cli, &mut config);

        assert_eq!(config.min_area, 250.0);
        assert_eq!(config.selection, Selection::LargestOnly);
        assert_eq!(config.model, Model::Knn);
        assert_eq!(config.sharing, Sharing::PerSession);
        assert!(!config.cleanup);
        assert_eq!(config.learning_rate, Some(0.01));
        assert_eq!(config.dump_masks, Some(PathBuf::from("/tmp/masks")));
        assert_eq!(config.keep_alive(), None);
    }

    #[test]
    fn test_unknown_selection_is_rejected() {
        let result = Cli::try_parse_from(["motion-relay", "--selection", "biggest"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_cli_changes_nothing() {
        let mut config = ServerConfig::default();
        apply_overrides(Cli::default(), &mut config);
        assert_eq!(config, ServerConfig::default());
    }
}
