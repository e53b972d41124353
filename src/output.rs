use anyhow::{Context, Result};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination of an entity writer. `finish` is called once when the
/// writer is closed.
pub trait OutputSink: Write {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl OutputSink for Vec<u8> {}

/// Output file, bzip2 compressed if its name ends in `.bz2`.
pub enum OutputFile {
    Plain(BufWriter<File>),
    Bz2(BzEncoder<BufWriter<File>>),
}

impl OutputFile {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        let writer = BufWriter::with_capacity(256 * 1024, file);
        if path.extension().is_some_and(|ext| ext == "bz2") {
            Ok(OutputFile::Bz2(BzEncoder::new(writer, Compression::default())))
        } else {
            Ok(OutputFile::Plain(writer))
        }
    }
}

impl OutputSink for OutputFile {
    /// Flushes buffers and writes the compression trailer.
    fn finish(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(writer) => writer.flush(),
            OutputFile::Bz2(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut().flush()
            }
        }
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputFile::Plain(writer) => writer.write(buf),
            OutputFile::Bz2(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(writer) => writer.flush(),
            OutputFile::Bz2(encoder) => encoder.flush(),
        }
    }
}
