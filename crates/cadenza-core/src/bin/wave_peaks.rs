//! Extract a waveform from an audio file and print a summary
//!
//! Usage: wave-peaks <file> [samples-per-pixel]

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use cadenza_core::config::EngineConfig;
use cadenza_core::playback::NullOutputFactory;
use cadenza_core::waveform::ExtractionConfig;
use cadenza_core::Engine;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: wave-peaks <file> [samples-per-pixel]");
    };
    let samples_per_pixel: usize = args
        .next()
        .map(|v| v.parse())
        .transpose()
        .context("samples-per-pixel must be an integer")?
        .unwrap_or(256);

    // No playback or capture here; keep the device stack out of the way.
    let engine = Engine::builder(EngineConfig::default())
        .output_factory(Arc::new(NullOutputFactory::new()))
        .build()?;

    let extractor = engine.create_extractor("wave-peaks")?;
    extractor.on_progress(|fraction| {
        eprint!("\r{:5.1}%", fraction * 100.0);
    });

    let ticket = extractor.extract(ExtractionConfig::new(&path, samples_per_pixel))?;
    let data = ticket.wait()?;
    eprintln!();

    println!("file:              {}", path);
    println!("source frames:     {}", data.source_frames);
    println!("source rate:       {} Hz", data.source_sample_rate);
    println!("samples per pixel: {}", data.samples_per_pixel);
    println!("channels:          {}", data.channels.len());
    println!("points/channel:    {}", data.points_per_channel());

    for (i, channel) in data.channels.iter().enumerate() {
        let max = channel.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        println!("channel {}: peak {:.4}", i, max);
    }

    engine.shutdown().ok();
    Ok(())
}
