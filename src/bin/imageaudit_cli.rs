//! ImageAudit CLI - Catalog conformance checks
//!
//! Commands: schemas, validate, audit
//! Reports go to stdout, logs to stderr
//! Returns 1 on fatal errors, 2 on non-conformance where asked

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use imageaudit_core::{
    render_json, AuditError, AuditPipeline, AuditSummary, ImageFilter, JsonImageSource,
    PropertyBag, SchemaRegistry, TextRenderer, ValidationOutcome, DEFAULT_SCHEMA_VERSION,
};

const EXIT_OK: u8 = 0;
const EXIT_FATAL: u8 = 1;
const EXIT_NON_CONFORMING: u8 = 2;

#[derive(Parser)]
#[command(name = "imageaudit-cli")]
#[command(version, about = "ImageAudit CLI - image metadata conformance auditor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of additional schema definitions (*.json)
    #[arg(long, global = true, env = "IMAGEAUDIT_SCHEMA_DIR")]
    schema_dir: Option<PathBuf>,

    /// Schema version to validate against
    #[arg(short, long, global = true, env = "IMAGEAUDIT_SCHEMA", default_value = DEFAULT_SCHEMA_VERSION)]
    schema: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List available schemas
    Schemas,

    /// Validate a single property bag
    Validate {
        /// JSON object of string properties
        #[arg(short, long)]
        payload: String,
    },

    /// Audit every image in a catalog listing
    Audit {
        /// Image listing as JSON, `-` for stdin
        #[arg(short, long, default_value = "-")]
        images: PathBuf,

        /// Only audit images with this visibility
        #[arg(long)]
        visibility: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Disable colored output
        #[arg(long, env = "NO_COLOR")]
        no_color: bool,

        /// Exit 2 if any eligible image is non-conforming
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn validate_status(outcome: &ValidationOutcome) -> u8 {
    if outcome.is_conforming() {
        EXIT_OK
    } else {
        EXIT_NON_CONFORMING
    }
}

fn audit_status(result: &Result<AuditSummary, AuditError>, strict: bool) -> u8 {
    match result {
        Ok(summary) if strict && !summary.all_conforming() => EXIT_NON_CONFORMING,
        Ok(_) => EXIT_OK,
        Err(_) => EXIT_FATAL,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // Compile schemas before anything else; failure here ends the run
    let registry = match &cli.schema_dir {
        Some(dir) => SchemaRegistry::load_from_dir(dir),
        None => SchemaRegistry::builtin(),
    };
    let registry = match registry {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to compile schemas");
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    if let Commands::Schemas = cli.command {
        let schemas: Vec<_> = registry
            .list()
            .iter()
            .map(|s| serde_json::json!({
                "version": s.version(),
                "title": s.title(),
                "digest": s.digest(),
                "required": s.required_keys(),
                "documentation": s.documentation(),
            }))
            .collect();

        println!("{}", serde_json::Value::Array(schemas));
        return ExitCode::SUCCESS;
    }

    let pipeline = match AuditPipeline::from_registry(&registry, &cli.schema) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Schemas => ExitCode::SUCCESS,

        Commands::Validate { payload } => {
            let bag: PropertyBag = match serde_json::from_str(&payload) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("{}", serde_json::json!({ "error": format!("Invalid payload: {}", e) }));
                    return ExitCode::FAILURE;
                }
            };

            let outcome = pipeline.validate_properties(&bag);
            let output = serde_json::json!({
                "schema": pipeline.schema().version(),
                "outcome": outcome,
            });
            println!("{}", output);

            ExitCode::from(validate_status(&outcome))
        }

        Commands::Audit { images, visibility, format, no_color, strict } => {
            let pipeline = pipeline.with_filter(ImageFilter { visibility });
            let source = JsonImageSource::new(images);
            let renderer = TextRenderer::new(!no_color);
            let schema = pipeline.schema();

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let result = pipeline.run(&source, |report| {
                let rendered = match format {
                    OutputFormat::Text => renderer.render(report, schema),
                    OutputFormat::Json => match render_json(report, schema) {
                        Ok(line) => line + "\n",
                        Err(e) => {
                            tracing::error!(image = %report.id, error = %e, "failed to serialize report");
                            return;
                        }
                    },
                };
                if let Err(e) = out.write_all(rendered.as_bytes()) {
                    tracing::error!(error = %e, "failed to write report");
                }
            });

            if let Err(e) = &result {
                tracing::error!(error = %e, "audit aborted");
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            ExitCode::from(audit_status(&result, strict))
        }
    }
}
