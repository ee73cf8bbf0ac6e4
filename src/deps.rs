/// Allow-listed Python dependency resolution backing the `installing` state.
///
/// Only imports with a known mapping to a trusted pip package are resolved;
/// everything else is either a stdlib module (no install needed) or simply
/// not ours to fetch. Install failures are logged to the job's sink and do
/// not abort the run: the script fails on its own ImportError instead.
use crate::logsink::LogSink;
use crate::types::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::process::Command;

/// Import name -> pip package. `None` marks stdlib modules that need no
/// install but should not be reported as unresolvable either.
const SAFE_PACKAGES: &[(&str, Option<&str>)] = &[
    ("requests", Some("requests")),
    ("numpy", Some("numpy")),
    ("pandas", Some("pandas")),
    ("matplotlib", Some("matplotlib")),
    ("bs4", Some("beautifulsoup4")),
    ("selenium", Some("selenium")),
    ("flask", Some("flask")),
    ("fastapi", Some("fastapi")),
    ("PIL", Some("Pillow")),
    ("cv2", Some("opencv-python")),
    ("yaml", Some("PyYAML")),
    ("lxml", Some("lxml")),
    ("psutil", Some("psutil")),
    ("aiohttp", Some("aiohttp")),
    ("colorama", Some("colorama")),
    ("tqdm", Some("tqdm")),
    ("pygame", Some("pygame")),
    ("tkinter", None),
    ("asyncio", None),
    ("json", None),
    ("os", None),
    ("sys", None),
    ("time", None),
    ("datetime", None),
    ("random", None),
    ("math", None),
    ("re", None),
    ("urllib", None),
    ("socket", None),
    ("threading", None),
    ("multiprocessing", None),
];

/// Pip packages a Python script declares via its import lines, deduplicated.
/// Unknown modules are ignored; they never trigger an install.
pub fn declared_packages(source: &str) -> Vec<String> {
    let import_re = Regex::new(r"^import\s+([A-Za-z_][A-Za-z0-9_]*)").expect("static regex");
    let from_re = Regex::new(r"^from\s+([A-Za-z_][A-Za-z0-9_]*)\s+import").expect("static regex");

    let mut packages = BTreeSet::new();
    for line in source.lines() {
        let line = line.trim();
        let module = import_re
            .captures(line)
            .or_else(|| from_re.captures(line))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        if let Some(module) = module {
            if let Some((_, Some(pkg))) = SAFE_PACKAGES.iter().find(|(m, _)| *m == module) {
                packages.insert(pkg.to_string());
            }
        }
    }

    packages.into_iter().collect()
}

/// Install each package with pip, streaming progress into the job's log
/// sink. Best-effort: a failed install is recorded and skipped.
pub async fn install_packages(packages: &[String], sink: &LogSink, workdir: &Path) -> Result<()> {
    let pip = which::which("pip3")
        .or_else(|_| which::which("pip"))
        .ok();

    let Some(pip) = pip else {
        sink.append_line("pip not available, skipping dependency install")
            .await?;
        return Ok(());
    };

    sink.append_line(&format!(
        "Auto-installing packages: {}",
        packages.join(", ")
    ))
    .await?;

    for package in packages {
        sink.append_line(&format!("Installing {}...", package)).await?;

        let output = Command::new(&pip)
            .args(["install", "--user", "--quiet", package])
            .current_dir(workdir)
            .output()
            .await;

        match output {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    sink.append_line(line).await?;
                }
                for line in String::from_utf8_lossy(&output.stderr).lines() {
                    sink.append_line(line).await?;
                }
                if output.status.success() {
                    sink.append_line(&format!("{} installed", package)).await?;
                } else {
                    sink.append_line(&format!(
                        "Failed to install {} (exit code: {})",
                        package,
                        output.status.code().unwrap_or(-1)
                    ))
                    .await?;
                }
            }
            Err(e) => {
                sink.append_line(&format!("Error installing {}: {}", package, e))
                    .await?;
            }
        }
    }

    sink.append_line(&"=".repeat(50)).await?;
    Ok(())
}
