//! On-disk records of a search: genealogy log, results stream and grid snapshots.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::compute::Grid;
use crate::schema::CheckpointErrors;

/// File layout under `<data_root>/<states>/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
}

impl RunPaths {
    pub fn new<P: AsRef<Path>>(data_root: P, states: u8) -> Self {
        Self {
            root: data_root.as_ref().join(states.to_string()),
        }
    }

    /// Directory holding genealogy logs and results streams.
    pub fn nn_dir(&self) -> PathBuf {
        self.root.join("nn")
    }

    /// `nn/<fingerprint>.gen`
    pub fn genealogy(&self, fingerprint: u64) -> PathBuf {
        self.nn_dir().join(format!("{fingerprint}.gen"))
    }

    /// `nn/<fingerprint>.res`
    pub fn results(&self, fingerprint: u64) -> PathBuf {
        self.nn_dir().join(format!("{fingerprint}.res"))
    }

    /// Results stream of random sampling runs.
    pub fn random_results(&self) -> PathBuf {
        self.nn_dir().join("random.res")
    }

    /// `steps/<fingerprint>/`
    pub fn steps_dir(&self, fingerprint: u64) -> PathBuf {
        self.root.join("steps").join(fingerprint.to_string())
    }
}

/// Open `path` for appending, creating it and its parent directories.
fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only log of the fingerprints selected each generation.
///
/// One row per generation: fingerprints in population order, tab-separated,
/// newline-terminated. Every row is flushed before returning.
pub struct GenealogyLog {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: usize,
}

impl GenealogyLog {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        Ok(Self {
            writer: open_append(&path)?,
            path,
            rows: 0,
        })
    }

    /// Append one generation.
    pub fn append_generation(&mut self, fingerprints: &[u64]) -> io::Result<()> {
        for (i, fp) in fingerprints.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b"\t")?;
            }
            write!(self.writer, "{fp}")?;
        }
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written through this handle.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Train/test error rows, one per checkpoint training session.
pub struct ResultsStream {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl ResultsStream {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        Ok(Self {
            writer: open_append(&path)?,
            path,
        })
    }

    /// Buffer one session row.
    pub fn append(&mut self, errors: &CheckpointErrors) -> io::Result<()> {
        writeln!(self.writer, "{:.6}    {:.6}", errors.train, errors.test)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flush and close.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Writes grid snapshots as `step_<t>.txt` files.
pub struct SnapshotWriter {
    dir: PathBuf,
    written: usize,
}

impl SnapshotWriter {
    /// Create the output directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, written: 0 })
    }

    /// Write the grid at `step`, one text row of state digits per grid row.
    pub fn write(&mut self, step: u64, grid: &Grid) -> io::Result<PathBuf> {
        let path = self.dir.join(format!("step_{step}.txt"));
        let mut writer = BufWriter::new(File::create(&path)?);
        grid.write_text(&mut writer)?;
        writer.flush()?;
        self.written += 1;
        Ok(path)
    }

    /// Snapshots written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_paths() {
        let paths = RunPaths::new("data_2d", 3);
        assert_eq!(paths.genealogy(42), PathBuf::from("data_2d/3/nn/42.gen"));
        assert_eq!(paths.results(42), PathBuf::from("data_2d/3/nn/42.res"));
        assert_eq!(paths.random_results(), PathBuf::from("data_2d/3/nn/random.res"));
        assert_eq!(paths.steps_dir(7), PathBuf::from("data_2d/3/steps/7"));
    }

    #[test]
    fn test_genealogy_rows() {
        let dir = tempdir().unwrap();
        let path = RunPaths::new(dir.path(), 2).genealogy(1);

        let mut log = GenealogyLog::open(&path).unwrap();
        log.append_generation(&[1, 22, 333]).unwrap();
        // Flushed rows are visible before the log is closed.
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\t22\t333\n");
        log.append_generation(&[4, 5, 6]).unwrap();
        assert_eq!(log.rows(), 2);
        log.finish().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "1\t22\t333\n4\t5\t6\n");
    }

    #[test]
    fn test_genealogy_appends_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.gen");

        GenealogyLog::open(&path)
            .unwrap()
            .append_generation(&[1])
            .unwrap();
        GenealogyLog::open(&path)
            .unwrap()
            .append_generation(&[2])
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n2\n");
    }

    #[test]
    fn test_results_stream_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nn").join("random.res");

        let mut stream = ResultsStream::open(&path).unwrap();
        stream
            .append(&CheckpointErrors {
                train: 0.5,
                test: 0.25,
            })
            .unwrap();
        stream.finish().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "0.500000    0.250000\n"
        );
    }

    #[test]
    fn test_snapshot_writer() {
        let dir = tempdir().unwrap();
        let mut writer = SnapshotWriter::new(dir.path().join("steps")).unwrap();
        let mut grid = Grid::filled(2, 0);
        grid.set(1, 0, 1);

        let path = writer.write(100, &grid).unwrap();
        assert!(path.ends_with("step_100.txt"));
        assert_eq!(fs::read_to_string(path).unwrap(), "00\n10\n");
        assert_eq!(writer.written(), 1);
    }
}
