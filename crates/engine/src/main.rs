use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use sy_domain::config::ObservabilityConfig;
use sy_engine::cli::{self, Cli, Command, ConfigCommand};
use sy_engine::runtime::graph::ExecutableGraph;
use sy_providers::AdapterRegistry;
use sy_tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_arg = cli.config.as_deref();

    match cli.command {
        Command::Run { message, thread, start, json } => {
            let (config, _) = cli::load_config(config_arg)?;
            let tracer_provider = if config.observability.export_enabled() {
                init_tracing(&config.observability)
            } else {
                init_cli_tracing();
                None
            };

            let result = cli::run::run(&config, message, thread, start, json).await;

            if let Some(provider) = tracer_provider {
                if let Err(e) = provider.shutdown() {
                    eprintln!("WARNING: tracer provider shutdown failed: {e}");
                }
            }
            if !result? {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            init_cli_tracing();
            let (config, config_path) = cli::load_config(config_arg)?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _config_path) = cli::load_config(config_arg)?;
            cli::config::show(&config);
            Ok(())
        }
        Command::Graph => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            let graph = ExecutableGraph::from_config(
                &config,
                &AdapterRegistry::with_builtins(),
                &ToolRegistry::with_builtins(),
            )?;
            print!("{}", cli::graph::describe(&graph));
            Ok(())
        }
        Command::History { thread } => {
            init_cli_tracing();
            let (config, _) = cli::load_config(config_arg)?;
            cli::history::show(&config, thread.as_deref())
        }
        Command::Version => {
            println!("switchyard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize stderr tracing with an OpenTelemetry layer.
///
/// Every `tracing` span (run, branch, llm.call, tool.call) is also
/// exported as an OTel span via OTLP/gRPC. The returned
/// [`SdkTracerProvider`] handle must be shut down on exit to flush
/// pending spans.
///
/// [`SdkTracerProvider`]: opentelemetry_sdk::trace::SdkTracerProvider
fn init_tracing(
    obs: &ObservabilityConfig,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sy_engine=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr);

    let Some(endpoint) = obs.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}, \
                 continuing without OpenTelemetry"
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.effective_sample_rate(),
        ))
        .with_resource(resource)
        .build();

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer_provider.tracer("switchyard"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

/// Initialize compact stderr-only tracing for CLI commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
