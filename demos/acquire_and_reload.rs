//! Example: Write a small multi-position acquisition, then reopen it
//!
//! Run with: cargo run --example acquire_and_reload [output-dir]
//!
//! Set `RUST_LOG=mmtiff=debug` to watch streams open and close.

use anyhow::{Context, Result};
use mmtiff::{Coords, Image, Metadata, SinglePlaneTiffStorage, SummaryMetadata};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const WIDTH: usize = 256;
const HEIGHT: usize = 256;

/// Synthetic 16-bit plane: a gradient shifted by channel, time, and z
fn synthetic_plane(channel: usize, time: usize, z: usize) -> Vec<u16> {
    (0..WIDTH * HEIGHT)
        .map(|i| {
            let (x, y) = (i % WIDTH, i / WIDTH);
            ((x + y) * 64 + channel * 1000 + time * 100 + z * 10) as u16
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mmtiff=info")),
        )
        .init();

    println!("mmtiff Acquire and Reload Demo");
    println!("==============================\n");

    let root = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::temp_dir().join(format!("mmtiff-demo-{}", std::process::id())),
    };

    let positions = ["Pos0", "Pos1"];
    let (channels, times, slices) = (2, 3, 4);

    // Write
    let start = Instant::now();
    {
        let storage = SinglePlaneTiffStorage::create(&root)
            .with_context(|| format!("creating dataset at {}", root.display()))?;
        storage.set_summary_metadata(
            SummaryMetadata::new()
                .with_prefix("demo")
                .with_channel_names(["DAPI", "GFP"])
                .with_axis_order(["position", "time", "channel", "z"])
                .with_z_step_um(0.5),
        );

        for (position, name) in positions.iter().enumerate() {
            for time in 0..times {
                for channel in 0..channels {
                    for z in 0..slices {
                        let coords = Coords::builder()
                            .stage_position(position)
                            .time(time)
                            .channel(channel)
                            .z(z)
                            .build();
                        let metadata = Metadata::new()
                            .with_position_name(*name)
                            .with_pixel_size_um(0.108)
                            .with_received_time(received_time(time));
                        let image = Image::from_u16(
                            &synthetic_plane(channel, time, z),
                            WIDTH,
                            HEIGHT,
                            coords,
                        )?
                        .with_metadata(metadata);
                        storage.put_image(&image)?;
                    }
                }
            }
        }
        println!("Wrote:  {}", storage.stats().summary());
        storage.freeze();
    }
    println!("        in {:.2?}\n", start.elapsed());

    // Reload
    let start = Instant::now();
    let reader = SinglePlaneTiffStorage::open(&root)
        .with_context(|| format!("opening dataset at {}", root.display()))?;
    println!("Opened: {}", reader.stats().summary());
    println!("        in {:.2?}", start.elapsed());
    println!("Axes:   {:?}", reader.get_axes());
    println!("Positions: {:?}", reader.position_names());

    let z_stack = reader.get_images_matching(
        &Coords::builder()
            .stage_position(1)
            .time(times - 1)
            .channel(1)
            .build(),
    );
    println!("\nLast GFP z-stack at Pos1: {} planes", z_stack.len());
    for image in &z_stack {
        let samples = image.as_u16().unwrap_or_default();
        let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len().max(1) as f64;
        println!(
            "  {} mean={:.1} pixel size={:?} um",
            image.coords(),
            mean,
            image.metadata().and_then(|m| m.pixel_size_um)
        );
    }

    println!("\nDataset left at {}", root.display());
    Ok(())
}

/// A received-time stamp in the `YYYY-MM-DD hh:mm:ss.fff zone` form
fn received_time(time: usize) -> String {
    format!("2024-06-01 09:{:02}:00.000 +0000", time)
}
