// src/main.rs
//! Array Recorder demo
//!
//! Records ten loops of compound and floating-point test data through an
//! `ActiveRecorder`, then prints what landed in the container.

use anyhow::{Context, Result};
use array_recorder::observability::{init_metrics, init_tracing};
use array_recorder::{ActiveRecorder, ContainerReader, DType, NdArray, RecorderConfig, Scalar};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const LOOPS: usize = 10;
const ROWS_1D: usize = 17;
const SHAPE_2D: [usize; 2] = [23, 29];

fn main() -> Result<()> {
    let config = RecorderConfig::load().context("Failed to load configuration")?;

    init_tracing(config.log_json)?;
    if let Some(addr) = config.metrics_socket() {
        init_metrics(addr)?;
    }

    info!("Starting array-recorder demo v{}", array_recorder::VERSION);
    info!("Configuration loaded: {:?}", config);

    let record_dtype = DType::compound([
        ("energy", DType::F64),
        ("hits", DType::U32),
        ("channel", DType::U32),
        ("valid", DType::Bool),
    ]);

    let mut recorder = ActiveRecorder::from_config(&config)?;
    recorder.open()?;

    let start = Instant::now();
    for i in 0..LOOPS {
        let record = NdArray::record(
            &record_dtype,
            &[
                Scalar::F64(i as f64 * 0.5),
                Scalar::U32(i as u32),
                Scalar::U32((i % 4) as u32),
                Scalar::Bool(i % 2 == 0),
            ],
        )?;
        record_all(&recorder, "record", &record)?;
        record_all(&recorder, "float", &NdArray::scalar(i as f64))?;

        thread::sleep(Duration::from_millis(5));
    }

    if let Some(queue) = recorder.queue_stats() {
        info!(
            "Enqueued {} messages ({} bytes) in {:?}",
            queue.sent,
            queue.bytes_sent,
            start.elapsed()
        );
    }

    recorder.close()?;

    let stats = recorder.stats();
    info!(
        "Recorder stopped: {} rows in {} flushes (avg {} ms)",
        stats.rows_committed,
        stats.flushes,
        stats.avg_flush_time_ms()
    );

    print_summary(&ContainerReader::open(recorder.path())?)?;
    Ok(())
}

/// Store `scalar` as-is and broadcast to 1-d and 2-d arrays
fn record_all(recorder: &ActiveRecorder, prefix: &str, scalar: &NdArray) -> Result<()> {
    recorder.append(&format!("{}_scalar", prefix), scalar.clone())?;

    let arrays = [
        ("1d", scalar.broadcast(vec![ROWS_1D])?),
        ("2d", scalar.broadcast(SHAPE_2D.to_vec())?),
    ];
    for (suffix, array) in arrays {
        recorder.append(&format!("{}_{}_append", prefix, suffix), array.clone())?;
        recorder.extend(&format!("{}_{}_extend", prefix, suffix), array)?;
    }

    Ok(())
}

fn print_summary(reader: &ContainerReader) -> Result<()> {
    println!("{}", reader.path().display());
    println!("{:<24} {:<40} {:>14}", "TABLE", "DTYPE", "SHAPE");

    for name in reader.table_names()? {
        let Some(info) = reader.table_info(&name)? else {
            continue;
        };
        println!(
            "{:<24} {:<40} {:>14}",
            name,
            info.dtype.to_string(),
            format!("{:?}", info.shape())
        );
    }

    Ok(())
}
