use std::{
    collections::HashMap,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use snafu::{ResultExt, Snafu};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{collector::ByteStream, node::NodeIdentity};

pub const SUMMARY_REPORT_NAME: &str = "summaryReport.txt";
pub const SUMMARY_ERRORS_REPORT_NAME: &str = "summaryErrorsReport.txt";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create archive {path:?}"))]
    CreateArchive {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to start archive entry {name:?}"))]
    StartEntry {
        source: zip::result::ZipError,
        name: String,
    },

    #[snafu(display("failed to write archive entry {name:?}"))]
    WriteEntry {
        source: std::io::Error,
        name: String,
    },

    #[snafu(display("stream feeding archive entry {name:?} failed"))]
    EntryStream {
        source: std::io::Error,
        name: String,
    },

    #[snafu(display("failed to open source archive {path:?}"))]
    OpenSource {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read source archive {path:?}"))]
    ReadSource {
        source: zip::result::ZipError,
        path: PathBuf,
    },

    #[snafu(display("failed to finish archive"))]
    FinishArchive { source: zip::result::ZipError },
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
}

/// Serializes collector output into the bundle archive.
///
/// Single-writer discipline: exactly one task owns an `ArchiveWriter`; the
/// builder and the coordinator both feed it through a channel. Entry names
/// that collide get a `-<n>` suffix so ZIP entries stay unique, and every
/// entry leaves a start/finish marker in the summary report.
pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    node: NodeIdentity,
    used_names: HashMap<String, u32>,
    report: Vec<String>,
}

impl ArchiveWriter {
    pub fn create(path: &Path, node: NodeIdentity) -> Result<Self, Error> {
        let file = File::create(path).context(CreateArchiveSnafu { path })?;
        let mut writer = Self {
            zip: ZipWriter::new(file),
            node,
            used_names: HashMap::new(),
            report: Vec::new(),
        };
        writer.log("bundle started");
        Ok(writer)
    }

    fn log(&mut self, message: impl AsRef<str>) {
        self.report.push(format!(
            "{} {} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            self.node,
            message.as_ref()
        ));
    }

    fn unique_name(&mut self, name: &str, gzip_encoded: bool) -> String {
        let base = if gzip_encoded {
            format!("{name}.gz")
        } else {
            name.to_string()
        };
        match self.used_names.get_mut(&base) {
            None => {
                self.used_names.insert(base.clone(), 0);
                base
            }
            Some(n) => {
                *n += 1;
                format!("{base}-{n}")
            }
        }
    }

    /// Copies one collector stream into a new entry. Returns the bytes
    /// written. A stream that errors mid-copy leaves a partial entry behind
    /// and surfaces [`Error::EntryStream`]; the archive itself stays usable.
    pub async fn add_entry(
        &mut self,
        name: &str,
        gzip_encoded: bool,
        mut stream: ByteStream,
    ) -> Result<u64, Error> {
        let entry_name = self.unique_name(name, gzip_encoded);
        self.log(format!("collecting {entry_name}"));
        self.zip
            .start_file(&entry_name, entry_options())
            .context(StartEntrySnafu { name: &entry_name })?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context(EntryStreamSnafu { name: &entry_name })?;
            self.zip
                .write_all(&chunk)
                .context(WriteEntrySnafu { name: &entry_name })?;
            written += chunk.len() as u64;
        }
        self.log(format!("collected {entry_name} ({written} bytes)"));
        Ok(written)
    }

    /// Copies every file entry of the archive at `source` under `prefix/`,
    /// keeping relative paths. Returns the number of entries copied.
    pub fn graft(&mut self, prefix: &str, source: &Path) -> Result<usize, Error> {
        let file = File::open(source).context(OpenSourceSnafu { path: source })?;
        let mut archive =
            zip::ZipArchive::new(file).context(ReadSourceSnafu { path: source })?;
        let mut copied = 0usize;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .context(ReadSourceSnafu { path: source })?;
            if entry.is_dir() {
                continue;
            }
            let name = format!("{prefix}/{}", entry.name());
            self.zip
                .start_file(&name, entry_options())
                .context(StartEntrySnafu { name: &name })?;
            std::io::copy(&mut entry, &mut self.zip).context(WriteEntrySnafu { name })?;
            copied += 1;
        }
        self.log(format!("merged {copied} entries under {prefix}/"));
        Ok(copied)
    }

    /// Appends the two summary entries (the error report only when errors
    /// exist) and closes the archive. Always the last write.
    pub fn finish(mut self, errors: &[String]) -> Result<(), Error> {
        self.log("bundle finished");
        self.zip
            .start_file(SUMMARY_REPORT_NAME, entry_options())
            .context(StartEntrySnafu {
                name: SUMMARY_REPORT_NAME,
            })?;
        for line in &self.report {
            writeln!(self.zip, "{line}").context(WriteEntrySnafu {
                name: SUMMARY_REPORT_NAME,
            })?;
        }
        if !errors.is_empty() {
            self.zip
                .start_file(SUMMARY_ERRORS_REPORT_NAME, entry_options())
                .context(StartEntrySnafu {
                    name: SUMMARY_ERRORS_REPORT_NAME,
                })?;
            for error in errors {
                writeln!(self.zip, "{error}").context(WriteEntrySnafu {
                    name: SUMMARY_ERRORS_REPORT_NAME,
                })?;
            }
        }
        self.zip.finish().context(FinishArchiveSnafu)?;
        Ok(())
    }
}
