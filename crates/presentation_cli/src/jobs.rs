//! Turning files and arguments into batch jobs

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use speech_synthesis::{AudioFormat, BatchJob, SynthesisRequest};
use tracing::debug;

const TEXT_EXTENSION: &str = "txt";

/// One job per `*.txt` file in `input_dir`, in natural file name order
///
/// `Chapter_2.txt` sorts before `Chapter_10.txt`. Each job writes
/// `<output_dir>/<stem>.<format>`. Empty files still become jobs so that they
/// show up as failures in the report.
pub fn discover(input_dir: &Path, output_dir: &Path, format: AudioFormat) -> anyhow::Result<Vec<BatchJob>> {
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory {}", input_dir.display()))?;

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(TEXT_EXTENSION));
        if is_text && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| natural_cmp(&file_stem(a), &file_stem(b)));

    let mut jobs = Vec::with_capacity(files.len());
    for path in files {
        let stem = file_stem(&path);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let destination = output_dir.join(format!("{stem}.{}", format.extension()));
        debug!(source = %path.display(), destination = %destination.display(), "Discovered job");

        jobs.push(BatchJob::new(
            stem.as_str(),
            SynthesisRequest::new(text, destination, format),
        ));
    }

    Ok(jobs)
}

/// The text of a `speak` invocation, from `--text` or `--file`
pub fn read_text(text: Option<String>, file: Option<&Path>) -> anyhow::Result<String> {
    match (text, file) {
        (Some(text), None) => Ok(text),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display())),
        _ => bail!("Exactly one of --text and --file is required"),
    }
}

/// A single job writing `text` to `output`, formatted by its extension
pub fn single(text: String, output: &Path, voice: Option<String>) -> anyhow::Result<BatchJob> {
    let Some(format) = output
        .extension()
        .and_then(|e| e.to_str())
        .and_then(AudioFormat::from_extension)
    else {
        bail!(
            "Cannot tell the audio format of {}; use an extension such as .mp3 or .wav",
            output.display()
        );
    };

    let mut request = SynthesisRequest::new(text, output, format);
    if let Some(voice) = voice {
        request = request.with_voice(voice);
    }

    Ok(BatchJob::new(file_stem(output).as_str(), request))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare names treating runs of digits as numbers
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l = take_number(&mut left);
                let r = take_number(&mut right);
                // Without leading zeros, the longer run is the larger number
                let order = l
                    .len()
                    .cmp(&r.len())
                    .then_with(|| l.cmp(&r));
                if order != Ordering::Equal {
                    return order;
                }
            },
            (Some(l), Some(r)) => {
                let order = l.cmp(&r);
                if order != Ordering::Equal {
                    return order;
                }
                left.next();
                right.next();
            },
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits.trim_start_matches('0').to_string()
}
