//! CPU profile capture, triggered at runtime by SIGUSR1.

use anyhow::Context;
use std::path::Path;
use std::time::Duration;

const SAMPLE_FREQUENCY_HZ: i32 = 100;

/// Sample the process for `duration` and write a flamegraph to `path`.
pub async fn capture_cpu(path: &Path, duration: Duration) -> anyhow::Result<()> {
    let guard = pprof::ProfilerGuardBuilder::default()
        .frequency(SAMPLE_FREQUENCY_HZ)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
        .context("can't start the CPU profiler")?;

    tokio::time::sleep(duration).await;

    let report = guard
        .report()
        .build()
        .context("can't build the profile report")?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("can't create {}", path.display()))?;
    report
        .flamegraph(file)
        .context("can't write the flamegraph")?;

    Ok(())
}
