//! Audio transcoding through an external `ffmpeg` subprocess.

use {
    anyhow::{Context, bail},
    std::path::Path,
    tokio::process::Command,
    tracing::debug,
};

/// Transcode `input` to mono 48 kHz Opus at `output`, the only audio format
/// the chat gateway accepts for voice notes.
pub async fn transcode_to_opus(input: &Path, output: &Path) -> anyhow::Result<()> {
    debug!(input = %input.display(), output = %output.display(), "transcoding audio");
    let result = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-vn", "-c:a", "libopus", "-b:a", "32k", "-ar", "48000", "-ac", "1"])
        .arg(output)
        .output()
        .await
        .context("failed to spawn ffmpeg")?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        bail!(
            "ffmpeg exited with {}: {}",
            result.status,
            stderr.lines().last().unwrap_or_default()
        );
    }
    Ok(())
}
