use std::process::ExitCode;

use clap::Parser;
use smelt::cli::{AppContext, Cli, Commands, InvalidInput};
use smelt::core::apply::ApplyError;
use smelt::core::archive::WriteError;
use smelt::core::blob::DeserializeError;
use smelt::core::session::SessionError;
use smelt::core::tree::TreeError;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = cli.context();
    init_tracing(&ctx);
    if ctx.no_color {
        owo_colors::set_override(false);
    }

    let result = match cli.command {
        Commands::Tree(args) => smelt::tree_run(args, &ctx),
        Commands::Pack(args) => smelt::pack_run(args, &ctx),
        Commands::Unpack(args) => smelt::unpack_run(args, &ctx),
        Commands::Patch(args) => smelt::patch_run(args, &ctx),
        Commands::Init(args) => smelt::infra::config::init(args, &ctx),
        Commands::Completions(args) => smelt::completion::run(args, &ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// `SMELT_LOG` wins; otherwise info, or debug with `--verbose`. Logs go to
/// stderr so stdout can carry a document.
fn init_tracing(ctx: &AppContext) {
    let fallback = if ctx.verbose { "smelt=debug" } else { "smelt=info" };
    let filter = EnvFilter::try_from_env("SMELT_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(!ctx.no_color)
        .init();
}

/// 2 overlap, 3 invalid input, 4 I/O, 5 anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<SessionError>() {
            match e {
                SessionError::Apply(ApplyError::OverlappingHunks { .. }) => return 2,
                SessionError::Apply(ApplyError::SpanOutOfBounds { .. }) => return 5,
                SessionError::Tree(_)
                | SessionError::NoTree
                | SessionError::NoDocument
                | SessionError::NothingPending
                | SessionError::DocumentMismatch => return 3,
                SessionError::Worker(_) => return 5,
            }
        }
        if let Some(e) = cause.downcast_ref::<ApplyError>() {
            return match e {
                ApplyError::OverlappingHunks { .. } => 2,
                ApplyError::SpanOutOfBounds { .. } => 5,
            };
        }
        if cause.is::<DeserializeError>() || cause.is::<TreeError>() || cause.is::<InvalidInput>() {
            return 3;
        }
        if cause.is::<WriteError>() || cause.is::<std::io::Error>() {
            return 4;
        }
    }
    5
}
