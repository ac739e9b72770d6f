use anyhow::Context;
use httpcall::config::Config;
use httpcall::executor::{BufferedExecutor, ExecutorEvent, ExecutorEventKind};
use httpcall::transport::TcpEngine;
use tracing_subscriber::EnvFilter;

const KEY_FIELD: &str = "key";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load().context("failed to load configuration")?;

    if cfg.requests.is_empty() {
        tracing::info!("No requests configured, nothing to do");
        return Ok(());
    }

    let engine = TcpEngine::new(cfg.transport_config());
    let mut executor = BufferedExecutor::with_engine(engine.clone(), cfg.executor.buffer_size);
    executor.set_poll_settings(cfg.poll_settings());

    executor.subscribe(ExecutorEventKind::CallCompleted, |event| {
        if let ExecutorEvent::CallCompleted { call, .. } = event {
            let key = call
                .request()
                .user_field(KEY_FIELD)
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            if call.has_error() {
                tracing::warn!(
                    key,
                    code = call.error_code(),
                    error = %call.error_message(),
                    "Call failed"
                );
            } else {
                let response = call.response();
                tracing::info!(
                    key,
                    status = ?response.status_code(),
                    bytes = response.raw_body().map_or(0, |b| b.len()),
                    seconds = call.execution_seconds(),
                    "Call completed"
                );
            }
        }
    });

    for request in &cfg.requests {
        let mut call = cfg.build_call(&engine, request)?;
        call.request_mut()
            .set_user_field(KEY_FIELD, Some(request.label().into()));
        executor.submit(call)?;
    }
    executor.invoke_all()?;

    let stats = executor.call_stats();
    tracing::info!(
        executed = executor.total_executed_call_count(),
        seconds = executor.total_call_execution_seconds(),
        throughput = executor.mean_throughput(),
        mean_call_seconds = stats.mean_execution_seconds(),
        "All requests executed"
    );

    Ok(())
}
