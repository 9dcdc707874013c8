use std::path::Path;

use clipclub_store::SqliteJobStore;
use clipclub_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with state_dir={}",
        config.state_dir.display()
    );
    ensure_tools(&["ffmpeg", "ffprobe", "yt-dlp"])?;
    ensure_writable(&config.state_dir).await?;
    ensure_database(&config.db_path).await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

fn ensure_tools(tools: &[&str]) -> anyhow::Result<()> {
    for tool in tools {
        let path = which::which(tool).map_err(|e| anyhow::anyhow!("{} not available: {}", tool, e))?;
        println!("worker-selfcheck: {} at {}", tool, path.display());
    }
    Ok(())
}

async fn ensure_writable(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    tempfile::NamedTempFile::new_in(path)
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    Ok(())
}

async fn ensure_database(path: &Path) -> anyhow::Result<()> {
    let store = SqliteJobStore::open(path)?;
    store.check_schema().await?;
    println!("worker-selfcheck: database at {}", path.display());
    Ok(())
}
