use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: env filtered `fmt` output, plus a jaeger
/// exporter when `jaeger` is set.
pub fn init(service_name: &str, jaeger: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer());

    if jaeger {
        let tracer = opentelemetry_jaeger::new_pipeline()
            .with_service_name(service_name)
            .install_simple()?;

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }

    Ok(())
}

/// Flushes any spans still buffered for export.
pub fn shutdown(jaeger: bool) {
    if jaeger {
        opentelemetry::global::shutdown_tracer_provider();
    }
}
