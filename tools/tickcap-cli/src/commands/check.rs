//! Check for required external tools.

use tickcap_common::config::{config_file_path, AppConfig};
use tickcap_media::process::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("tickcap System Check");
    println!("{}", "=".repeat(50));

    let tools = [
        ("ffmpeg", &config.capture.ffmpeg_path, "episode video encoding"),
        ("ffmpeg", &config.align.ffmpeg_path, "alignment re-encoding"),
        ("ffprobe", &config.align.ffprobe_path, "frame timestamp extraction"),
    ];
    let mut all_ok = true;
    for (label, path, purpose) in tools {
        if command_exists(path) {
            println!("[OK]   {label} ({path}) for {purpose}");
        } else {
            all_ok = false;
            println!("[MISS] {label} ({path}) for {purpose}");
        }
    }

    println!();
    let config_path = config_file_path();
    if config_path.exists() {
        println!("Config: {}", config_path.display());
    } else {
        println!("Config: defaults ({} not found)", config_path.display());
    }
    println!(
        "Capture: {} -> {}",
        config.capture.bind_addr(),
        config.capture.output_dir.display()
    );

    println!();
    if all_ok {
        println!("All required tools are available. tickcap is ready.");
    } else {
        println!("Some tools are missing. Install ffmpeg (which provides ffprobe) or set their paths in the config.");
    }
    Ok(())
}
