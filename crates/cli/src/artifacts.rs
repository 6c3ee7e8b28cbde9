use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Output files of one run, all stamped with the same unix timestamp.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    dir: PathBuf,
    stamp: i64,
}

impl RunArtifacts {
    pub fn new(dir: impl Into<PathBuf>, stamp: i64) -> Self {
        Self {
            dir: dir.into(),
            stamp,
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(format!("results-{}.json", self.stamp))
    }

    pub fn findings_path(&self) -> PathBuf {
        self.dir.join(format!("findings-{}.json", self.stamp))
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join(format!("report-{}.html", self.stamp))
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}
