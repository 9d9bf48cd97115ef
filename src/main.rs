use dispatch_pool::{
    assert_in_pool, run_in_pool, run_on_loop, Config, LoopThread, ThreadPoolInner,
};
use std::{
    error::Error,
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

fn read_blob(len: usize) -> usize {
    thread::sleep(Duration::from_millis(20));
    len * 2
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!(?config, "starting pool");
    let pool = ThreadPoolInner::with_config(config);
    let event_loop = LoopThread::spawn("event-loop")?;

    let publish = run_on_loop(event_loop.handle(), |(id, bytes): (usize, usize)| {
        tracing::info!(id, bytes, "published on loop thread");
    })
    .named("publish");
    let read = assert_in_pool(read_blob);
    let fetch = run_in_pool(pool.clone(), move |id: usize| {
        let bytes = read.call(id * 512);
        publish.call((id, bytes));
    })
    .named("fetch");

    let now = Instant::now();
    for id in 0..32 {
        fetch.call(id)?;
    }
    tracing::info!(metrics = ?pool.metrics(), "submitted");

    let timeout = pool.config().timeout * 4 + Duration::from_secs(1);
    if !pool.wait_idle(timeout) {
        tracing::warn!(live = pool.live_workers(), "pool still busy");
    }
    event_loop.shutdown();
    tracing::info!(metrics = ?pool.metrics(), elapsed = ?now.elapsed(), "done");
    Ok(())
}
