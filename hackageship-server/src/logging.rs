use clap::{ArgGroup, Args};
use opentelemetry::{
    global,
    sdk::{
        propagation::TraceContextPropagator,
        trace::{self, IdGenerator, Sampler},
        Resource,
    },
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::format::{Format, JsonFields, PrettyFields},
    layer::SubscriberExt,
    Registry,
};

#[derive(Args, Debug)]
pub struct RuntimeArgs {
    /// OTLP collector to send traces to. Tracing export is off when unset.
    #[clap(long = "otel-collector", env = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")]
    pub otel_collector: Option<String>,
}

#[derive(Args, Debug)]
#[clap(group = ArgGroup::new("logging"))]
pub struct LoggingOpts {
    /// A level of verbosity, and can be used multiple times
    #[clap(short, long, parse(from_occurrences), global(true), group = "logging")]
    pub debug: u64,

    /// Enable warn logging
    #[clap(short, long, global(true), group = "logging")]
    pub warn: bool,

    /// Disable everything but error logging
    #[clap(short, long, global(true), group = "logging")]
    pub error: bool,
}

impl From<&LoggingOpts> for LevelFilter {
    fn from(opts: &LoggingOpts) -> Self {
        if opts.error {
            LevelFilter::ERROR
        } else if opts.warn {
            LevelFilter::WARN
        } else if opts.debug == 0 {
            LevelFilter::INFO
        } else if opts.debug == 1 {
            LevelFilter::DEBUG
        } else {
            LevelFilter::TRACE
        }
    }
}

pub fn configure_logging(
    logging_opts: &LoggingOpts,
    runtime_args: &RuntimeArgs,
) -> Result<(), anyhow::Error> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otel_layer = match &runtime_args.otel_collector {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_trace_config(
                    trace::config()
                        .with_sampler(Sampler::AlwaysOn)
                        .with_id_generator(IdGenerator::default())
                        .with_resource(Resource::new(vec![KeyValue::new(
                            "service.name",
                            "hackageship",
                        )])),
                )
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint.clone()),
                )
                .install_batch(opentelemetry::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    // Humans at a terminal get readable output, everything else gets JSON.
    let (pretty_output, json_output) = if atty::is(atty::Stream::Stdout) {
        let layer = tracing_subscriber::fmt::layer()
            .event_format(Format::default().pretty())
            .fmt_fields(PrettyFields::new());
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .event_format(Format::default().json().flatten_event(true))
            .fmt_fields(JsonFields::new());
        (None, Some(layer))
    };

    let subscriber = Registry::default()
        .with(LevelFilter::from(logging_opts))
        .with(otel_layer)
        .with(pretty_output)
        .with(json_output);

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    Ok(())
}
