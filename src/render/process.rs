//! External conversion tools.
//!
//! Thin wrappers over `tokio::process::Command` for ImageMagick
//! (`convert`, `identify`), LibreOffice (`soffice`) and poppler (`pdfinfo`).

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected output from '{program}': {output}")]
    UnexpectedOutput { program: String, output: String },
}

/// Runs `program` with `args` and returns its trimmed stdout.
pub async fn run_tool<I, S>(program: &str, args: I) -> Result<String, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = program, "Running external tool");
    let output = cmd.output().await.map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Page count of a PDF, via `pdfinfo`.
pub async fn pdf_page_count(path: &Path) -> Result<u32, ToolError> {
    let output = run_tool("pdfinfo", [path.as_os_str()]).await?;
    parse_pdfinfo_pages(&output).ok_or(ToolError::UnexpectedOutput {
        program: "pdfinfo".to_string(),
        output,
    })
}

/// Pixel dimensions of an image, via `identify`.
pub async fn image_dimensions(path: &Path) -> Result<(u32, u32), ToolError> {
    let output = run_tool(
        "identify",
        [OsStr::new("-format"), OsStr::new("%w %h\\n"), path.as_os_str()],
    )
    .await?;
    parse_dimensions(&output).ok_or(ToolError::UnexpectedOutput {
        program: "identify".to_string(),
        output,
    })
}

/// Converts a document to PDF inside `out_dir` and returns the PDF path.
pub async fn convert_to_pdf(input: &Path, out_dir: &Path) -> Result<std::path::PathBuf, ToolError> {
    run_tool(
        "soffice",
        [
            OsStr::new("--headless"),
            OsStr::new("--convert-to"),
            OsStr::new("pdf"),
            OsStr::new("--outdir"),
            out_dir.as_os_str(),
            input.as_os_str(),
        ],
    )
    .await?;

    let stem = input.file_stem().unwrap_or_else(|| OsStr::new("document"));
    Ok(out_dir.join(stem).with_extension("pdf"))
}

fn parse_pdfinfo_pages(output: &str) -> Option<u32> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse().ok())
}

fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    // Multi-frame inputs print one line per frame; the first one wins.
    let mut parts = output.lines().next()?.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some((width, height))
}
